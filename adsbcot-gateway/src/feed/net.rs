//! Raw Mode-S over TCP: hex lines (port 30002) or beast binary (port 30005).
//!
//! Bytes go through the frame buffer, frames through the decoder adapter,
//! and every record a decode pass resolves goes to the worker. The
//! connection is retried with exponential backoff; a successful connect
//! resets the attempt count.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adsbcot_core::{DecoderAdapter, FrameBuffer, FramingMode};

use super::{pause, queue_closed, AdapterState, FeedAdapter, StateMachine};
use crate::error::{GatewayError, Result};
use crate::pipeline::{Outcome, Worker};

const READ_CHUNK: usize = 4096;
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct NetFeed {
    url: String,
    addr: String,
    max_retries: u32,
    initial_backoff: Duration,
    buffer: FrameBuffer,
    decoder: DecoderAdapter,
    state: StateMachine,
}

impl NetFeed {
    pub fn new(url: &str, host: &str, port: u16, mode: FramingMode, max_retries: u32) -> Self {
        NetFeed {
            url: url.to_string(),
            addr: format!("{host}:{port}"),
            max_retries,
            initial_backoff: INITIAL_BACKOFF,
            buffer: FrameBuffer::new(mode),
            decoder: DecoderAdapter::new(),
            state: StateMachine::new(url),
        }
    }

    /// Feed received bytes through framing and decoding. Returns the number
    /// of events enqueued.
    pub async fn ingest(&mut self, bytes: &[u8], worker: &Worker) -> Result<usize> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        for frame in self.buffer.push(bytes) {
            self.decoder.accept(&frame, now);
        }
        let Some(records) = self.decoder.commit() else {
            return Ok(0);
        };

        let mut enqueued = 0;
        for record in &records {
            if worker.handle_record(record).await? == Outcome::Enqueued {
                enqueued += 1;
            }
        }
        debug!(
            feed = %self.url,
            resolved = records.len(),
            enqueued,
            passes = self.decoder.passes,
            "decode pass"
        );
        Ok(enqueued)
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<Option<TcpStream>> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            stream = TcpStream::connect(&self.addr) => stream
                .map(Some)
                .map_err(|source| GatewayError::Connect { addr: self.addr.clone(), source }),
        }
    }

    /// Read until the peer closes, an error, or cancellation (`Ok`).
    async fn stream(
        &mut self,
        mut stream: TcpStream,
        worker: &Worker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = stream.shutdown().await;
                    return Ok(());
                }
                n = stream.read(&mut chunk) => n?,
            };
            if n == 0 {
                return Err(GatewayError::ConnectionLost(self.addr.clone()));
            }
            self.ingest(&chunk[..n], worker).await?;
        }
    }
}

#[async_trait]
impl FeedAdapter for NetFeed {
    fn name(&self) -> &str {
        &self.url
    }

    async fn run(&mut self, worker: Worker, cancel: CancellationToken) -> Result<()> {
        info!(feed = %self.url, mode = self.buffer.mode().name(), "reading raw Mode-S feed");
        let mut attempts: u32 = 0;
        let mut backoff = self.initial_backoff;

        loop {
            self.state.transition(AdapterState::Connecting);
            let failure = match self.connect(&cancel).await {
                Ok(None) => break,
                Ok(Some(stream)) => {
                    attempts = 0;
                    backoff = self.initial_backoff;
                    self.buffer.reset();
                    self.state.transition(AdapterState::Streaming);
                    info!(feed = %self.url, addr = %self.addr, "connected");
                    match self.stream(stream, &worker, &cancel).await {
                        Ok(()) => break,
                        Err(GatewayError::QueueClosed) => {
                            self.state.transition(AdapterState::Stopped);
                            return queue_closed(&cancel);
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => {
                    attempts += 1;
                    e
                }
            };

            self.state.fail();
            if attempts > self.max_retries {
                self.state.transition(AdapterState::Stopped);
                if self.max_retries == 0 {
                    return Err(failure);
                }
                return Err(GatewayError::ReconnectExhausted {
                    addr: self.addr.clone(),
                    attempts,
                });
            }
            warn!(
                feed = %self.url,
                error = %failure,
                attempt = attempts,
                max = self.max_retries,
                delay = ?backoff,
                "connection failed, backing off"
            );
            if !pause(backoff, &cancel).await {
                break;
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        self.state.transition(AdapterState::Stopped);
        info!(
            feed = %self.url,
            skipped = self.buffer.skipped(),
            rejected = self.decoder.rejected_frames,
            "raw feed stopped"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineState, QueuePolicy};
    use adsbcot_core::CotConfig;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const IDENT: &str = "8DA9EE47213B7CF954C820605AD9";
    const VELOCITY: &str = "8DA9EE4799003E06802403BA26E4";
    const EVEN: &str = "8DA9EE475817C1396C22F4C98C5A";
    const ODD: &str = "8DA9EE475817C4CDCCD08242ABDA";

    fn lines() -> String {
        [IDENT, VELOCITY, EVEN, ODD]
            .iter()
            .map(|f| format!("*{f};\n"))
            .collect()
    }

    fn worker() -> (Worker, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(8);
        let state = Arc::new(PipelineState::new(None, None));
        (
            Worker::new(CotConfig::default(), state, tx, QueuePolicy::Block),
            rx,
        )
    }

    #[tokio::test]
    async fn test_ingest_resolves_aircraft() {
        let mut feed = NetFeed::new("tcp://x", "x", 30002, FramingMode::Raw, 0);
        let (worker, mut rx) = worker();

        assert_eq!(feed.ingest(lines().as_bytes(), &worker).await.unwrap(), 1);
        let xml = String::from_utf8(rx.recv().await.unwrap()).unwrap();
        assert!(xml.contains(r#"uid="ICAO-A9EE47""#));
        assert!(xml.contains(r#"callsign="N739UL""#));
    }

    #[tokio::test]
    async fn test_single_squitter_waits_for_next_chunk() {
        let mut feed = NetFeed::new("tcp://x", "x", 30002, FramingMode::Raw, 0);
        let (worker, _rx) = worker();
        assert_eq!(feed.ingest(format!("*{IDENT};\n").as_bytes(), &worker).await.unwrap(), 0);
        assert_eq!(feed.decoder.pending(), 1);
        assert_eq!(feed.decoder.passes, 0);
    }

    #[tokio::test]
    async fn test_stream_from_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(lines().as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut feed = NetFeed::new(
            "tcp+raw://127.0.0.1",
            "127.0.0.1",
            addr.port(),
            FramingMode::Raw,
            3,
        );
        let (worker, mut rx) = worker();
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { feed.run(worker, cancel).await })
        };

        let xml = String::from_utf8(rx.recv().await.unwrap()).unwrap();
        assert!(xml.contains(r#"uid="ICAO-A9EE47""#));
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        server.abort();
    }

    #[tokio::test]
    async fn test_closed_queue_after_cancel_is_clean() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(lines().as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        // a full queue leaves the adapter blocked in send
        let (tx, rx) = mpsc::channel(1);
        tx.send(b"<event/>".to_vec()).await.unwrap();
        let state = Arc::new(PipelineState::new(None, None));
        let worker = Worker::new(CotConfig::default(), state, tx, QueuePolicy::Block);

        let mut feed = NetFeed::new(
            "tcp+raw://127.0.0.1",
            "127.0.0.1",
            addr.port(),
            FramingMode::Raw,
            3,
        );
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { feed.run(worker, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        cancel.cancel();
        drop(rx);
        assert!(task.await.unwrap().is_ok());
        server.abort();
    }

    #[tokio::test]
    async fn test_closed_queue_without_cancel_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(lines().as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let (worker, rx) = worker();
        drop(rx);
        let mut feed = NetFeed::new(
            "tcp+raw://127.0.0.1",
            "127.0.0.1",
            addr.port(),
            FramingMode::Raw,
            3,
        );
        let result = feed.run(worker, CancellationToken::new()).await;
        assert!(matches!(result, Err(GatewayError::QueueClosed)));
        server.abort();
    }

    #[tokio::test]
    async fn test_no_retries_fails_on_first_connect_error() {
        // bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut feed = NetFeed::new("tcp://127.0.0.1", "127.0.0.1", port, FramingMode::Raw, 0);
        let (worker, _rx) = worker();
        let result = feed.run(worker, CancellationToken::new()).await;
        assert!(matches!(result, Err(GatewayError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut feed = NetFeed::new("tcp://127.0.0.1", "127.0.0.1", port, FramingMode::Beast, 2);
        feed.initial_backoff = Duration::from_millis(10);
        let (worker, _rx) = worker();
        let result = feed.run(worker, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(GatewayError::ReconnectExhausted { attempts: 3, .. })
        ));
    }
}
