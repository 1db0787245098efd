//! WebSocket stream: each inbound message is one update, a list of updates,
//! or a full snapshot. On close or error, wait briefly and reconnect.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adsbcot_core::record;

use super::{pause, queue_closed, AdapterState, FeedAdapter, StateMachine};
use crate::error::{GatewayError, Result};
use crate::pipeline::Worker;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct WebSocketFeed {
    url: String,
    reconnect_delay: Duration,
    state: StateMachine,
}

impl WebSocketFeed {
    pub fn new(url: &str) -> Self {
        WebSocketFeed {
            url: url.to_string(),
            reconnect_delay: RECONNECT_DELAY,
            state: StateMachine::new(url),
        }
    }

    /// Handle one text message. Unparseable messages are skipped.
    pub async fn handle_text(&self, text: &str, worker: &Worker) -> Result<usize> {
        if text.trim().is_empty() {
            return Ok(0);
        }
        let doc: Value = match serde_json::from_str(text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(feed = %self.url, error = %e, "skipping unparseable message");
                return Ok(0);
            }
        };
        worker.handle_entries(record::message_entries(&doc)).await
    }

    /// One connection, until it ends. `Ok` only on cancellation.
    async fn stream(&mut self, worker: &Worker, cancel: &CancellationToken) -> Result<()> {
        let (mut ws, _) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            connected = connect_async(self.url.as_str()) => connected?,
        };
        self.state.transition(AdapterState::Streaming);
        info!(feed = %self.url, "connected");

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                message = ws.next() => message,
            };
            match message {
                None | Some(Ok(Message::Close(_))) => {
                    return Err(GatewayError::ConnectionLost(self.url.clone()))
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => {
                    self.handle_text(&text, worker).await?;
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        self.handle_text(text, worker).await?;
                    }
                    Err(_) => debug!(feed = %self.url, "skipping non-UTF-8 binary message"),
                },
                Some(Ok(_)) => {}
            }
        }
    }
}

#[async_trait]
impl FeedAdapter for WebSocketFeed {
    fn name(&self) -> &str {
        &self.url
    }

    async fn run(&mut self, worker: Worker, cancel: CancellationToken) -> Result<()> {
        info!(feed = %self.url, "streaming WebSocket feed");
        self.state.transition(AdapterState::Connecting);

        loop {
            match self.stream(&worker, &cancel).await {
                Ok(()) => break,
                Err(GatewayError::QueueClosed) => {
                    self.state.transition(AdapterState::Stopped);
                    return queue_closed(&cancel);
                }
                Err(e) => {
                    warn!(feed = %self.url, error = %e, delay = ?self.reconnect_delay, "WebSocket closed, reconnecting");
                    self.state.fail();
                }
            }
            if !pause(self.reconnect_delay, &cancel).await {
                break;
            }
            self.state.transition(AdapterState::Connecting);
        }

        self.state.transition(AdapterState::Stopped);
        info!(feed = %self.url, "WebSocket feed stopped");
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
    use futures_util::SinkExt;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const UPDATE: &str = r#"{"hex": "a9ee47", "flight": "N739UL", "lat": 37.836449,
        "lon": -122.030281, "alt_geom": 3750, "gs": 79.5, "track": 50.1}"#;

    fn worker() -> (Worker, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(8);
        let state = Arc::new(PipelineState::new(None, None));
        (
            Worker::new(CotConfig::default(), state, tx, QueuePolicy::Block),
            rx,
        )
    }

    #[tokio::test]
    async fn test_handle_text_shapes() {
        let feed = WebSocketFeed::new("ws://unused");
        let (worker, _rx) = worker();
        assert_eq!(feed.handle_text(UPDATE, &worker).await.unwrap(), 1);
        assert_eq!(
            feed.handle_text(&format!("[{UPDATE}, {UPDATE}]"), &worker).await.unwrap(),
            2
        );
        assert_eq!(feed.handle_text("garbage", &worker).await.unwrap(), 0);
        assert_eq!(feed.handle_text("", &worker).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        // first connection sends one update then closes; second stays open
        let server = tokio::spawn(async move {
            for keep_open in [false, true] {
                let (socket, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                ws.send(Message::Text(UPDATE.to_string())).await.unwrap();
                if keep_open {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                } else {
                    ws.close(None).await.unwrap();
                }
            }
        });

        let mut feed = WebSocketFeed::new(&url);
        feed.reconnect_delay = Duration::from_millis(50);
        let (worker, mut rx) = worker();
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { feed.run(worker, cancel).await })
        };

        for _ in 0..2 {
            let xml = String::from_utf8(rx.recv().await.unwrap()).unwrap();
            assert!(xml.contains(r#"uid="ICAO-A9EE47""#));
        }
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        server.abort();
    }
}
