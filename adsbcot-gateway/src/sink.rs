//! Minimal CoT sink: drains the output queue to TCP, UDP, or stdout.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{GatewayError, Result};
use crate::pipeline::EventReceiver;

pub const DEFAULT_COT_URL: &str = "udp://239.2.3.1:6969";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// Events written back to back on one stream.
    Tcp(String),
    /// One datagram per event.
    Udp(String),
    /// One event per line.
    Stdout,
}

impl SinkTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.eq_ignore_ascii_case("stdout:") || url.eq_ignore_ascii_case("stdout://") {
            return Ok(SinkTarget::Stdout);
        }
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| GatewayError::config(format!("invalid COT_URL {url:?}")))?;
        let addr = rest.trim_end_matches('/');
        if addr.rsplit_once(':').map_or(true, |(host, port)| {
            host.is_empty() || port.parse::<u16>().is_err()
        }) {
            return Err(GatewayError::config(format!(
                "COT_URL {url:?} needs host:port"
            )));
        }
        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Ok(SinkTarget::Tcp(addr.to_string())),
            "udp" => Ok(SinkTarget::Udp(addr.to_string())),
            other => Err(GatewayError::config(format!(
                "unsupported COT_URL scheme {other:?}"
            ))),
        }
    }
}

/// Drain `rx` into `target` until the queue closes or `cancel` fires.
/// Returns the number of events written.
pub async fn run(target: SinkTarget, rx: EventReceiver, cancel: CancellationToken) -> Result<u64> {
    info!(target = ?target, "CoT sink starting");
    let written = match &target {
        SinkTarget::Tcp(addr) => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|source| GatewayError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            drain(stream, rx, cancel, None).await?
        }
        SinkTarget::Udp(addr) => send_datagrams(addr, rx, cancel).await?,
        SinkTarget::Stdout => drain(tokio::io::stdout(), rx, cancel, Some(b'\n')).await?,
    };
    info!(written, "CoT sink stopped");
    Ok(written)
}

/// Write each event to `writer`, optionally followed by `separator`.
pub async fn drain<W>(
    mut writer: W,
    mut rx: EventReceiver,
    cancel: CancellationToken,
    separator: Option<u8>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        writer.write_all(&event).await?;
        if let Some(sep) = separator {
            writer.write_all(&[sep]).await?;
        }
        writer.flush().await?;
        written += 1;
    }
    writer.flush().await?;
    Ok(written)
}

async fn send_datagrams(addr: &str, mut rx: EventReceiver, cancel: CancellationToken) -> Result<u64> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect(addr)
        .await
        .map_err(|source| GatewayError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    let mut written = 0;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        socket.send(&event).await?;
        written += 1;
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_targets() {
        assert_eq!(
            SinkTarget::parse(DEFAULT_COT_URL).unwrap(),
            SinkTarget::Udp("239.2.3.1:6969".into())
        );
        assert_eq!(
            SinkTarget::parse("tcp://takserver.local:8087/").unwrap(),
            SinkTarget::Tcp("takserver.local:8087".into())
        );
        assert_eq!(SinkTarget::parse("stdout:").unwrap(), SinkTarget::Stdout);
        assert!(SinkTarget::parse("tls://x:8089").is_err());
        assert!(SinkTarget::parse("udp://x").is_err());
        assert!(SinkTarget::parse("239.2.3.1:6969").is_err());
    }

    #[tokio::test]
    async fn test_drain_until_queue_closes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(b"<event a/>".to_vec()).await.unwrap();
        tx.send(b"<event b/>".to_vec()).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        let written = drain(&mut out, rx, CancellationToken::new(), Some(b'\n'))
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(out, b"<event a/>\n<event b/>\n");
    }

    #[tokio::test]
    async fn test_drain_stops_on_cancel() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        assert_eq!(drain(&mut out, rx, cancel, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_udp_one_datagram_per_event() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap().to_string();

        let (tx, rx) = mpsc::channel(4);
        tx.send(b"<event a/>".to_vec()).await.unwrap();
        tx.send(b"<event b/>".to_vec()).await.unwrap();
        drop(tx);
        let written = run(SinkTarget::Udp(addr), rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(written, 2);

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<event a/>");
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<event b/>");
    }
}
