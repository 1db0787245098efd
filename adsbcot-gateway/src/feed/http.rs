//! HTTP snapshot polling.
//!
//! Each cycle fetches one full aircraft document. A non-200 status or an
//! unparseable body skips the cycle; the next poll happens on schedule.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adsbcot_core::record;

use super::{pause, queue_closed, AdapterState, FeedAdapter, FeedSettings, StateMachine};
use crate::error::{GatewayError, Result};
use crate::pipeline::Worker;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpFeed {
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    interval: Duration,
    state: StateMachine,
}

/// Auth headers for `url`: RapidAPI endpoints take a key and host pair,
/// anything else a single `api-auth` key.
pub fn auth_headers(url: &str, api_key: Option<&str>, rapidapi_host: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let Some(key) = api_key.filter(|k| !k.is_empty()) else {
        return Ok(headers);
    };

    let value = |v: &str| {
        HeaderValue::from_str(v).map_err(|_| GatewayError::config("API key is not a valid header value"))
    };
    if url.contains("rapidapi") {
        headers.insert(HeaderName::from_static("x-rapidapi-key"), value(key)?);
        headers.insert(HeaderName::from_static("x-rapidapi-host"), value(rapidapi_host)?);
    } else {
        headers.insert(HeaderName::from_static("api-auth"), value(key)?);
    }
    Ok(headers)
}

impl HttpFeed {
    pub fn new(url: &str, settings: &FeedSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(HttpFeed {
            url: url.to_string(),
            client,
            headers: auth_headers(url, settings.api_key.as_deref(), &settings.rapidapi_host)?,
            interval: settings.poll_interval,
            state: StateMachine::new(url),
        })
    }

    /// Fetch and handle one snapshot. Returns the number of events enqueued.
    pub async fn poll_once(&self, worker: &Worker) -> Result<usize> {
        let response = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(feed = %self.url, status = status.as_u16(), "poll returned non-success status");
            return Ok(0);
        }

        let doc: Value = response.json().await?;
        let Some(entries) = record::snapshot_entries(&doc) else {
            warn!(feed = %self.url, "response has no aircraft list");
            return Ok(0);
        };
        worker.handle_entries(entries).await
    }
}

#[async_trait]
impl FeedAdapter for HttpFeed {
    fn name(&self) -> &str {
        &self.url
    }

    async fn run(&mut self, worker: Worker, cancel: CancellationToken) -> Result<()> {
        info!(feed = %self.url, interval = ?self.interval, "polling HTTP feed");
        self.state.transition(AdapterState::Connecting);
        self.state.transition(AdapterState::Polling);

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.poll_once(&worker) => polled,
            };
            match polled {
                Ok(enqueued) => debug!(feed = %self.url, enqueued, "poll complete"),
                Err(GatewayError::QueueClosed) => {
                    self.state.transition(AdapterState::Stopped);
                    return queue_closed(&cancel);
                }
                Err(e) => warn!(feed = %self.url, error = %e, "poll failed, skipping cycle"),
            }
            if !pause(self.interval, &cancel).await {
                break;
            }
        }

        self.state.transition(AdapterState::Stopped);
        info!(feed = %self.url, "HTTP feed stopped");
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const SNAPSHOT: &str = r#"{"now": 1621462058.0, "aircraft": [
        {"hex": "a9ee47", "flight": "N739UL", "lat": 37.836449, "lon": -122.030281,
         "alt_geom": 3750, "gs": 79.5, "track": 50.1, "category": "A1"},
        {"hex": "ac82ec", "flight": "UAL1"}
    ]}"#;

    /// Serve one response and hand back the request text.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{addr}/data/aircraft.json"), handle)
    }

    fn worker() -> (Worker, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(8);
        let state = Arc::new(PipelineState::new(None, None));
        (
            Worker::new(CotConfig::default(), state, tx, QueuePolicy::Block),
            rx,
        )
    }

    #[test]
    fn test_auth_headers() {
        let plain = auth_headers("https://adsbexchange.com/api/", Some("k1"), "h").unwrap();
        assert_eq!(plain.get("api-auth").unwrap(), "k1");

        let rapid = auth_headers(
            "https://adsbexchange-com1.p.rapidapi.com/v2/lat/37/lon/-122/dist/25/",
            Some("k2"),
            "adsbexchange-com1.p.rapidapi.com",
        )
        .unwrap();
        assert_eq!(rapid.get("x-rapidapi-key").unwrap(), "k2");
        assert_eq!(
            rapid.get("x-rapidapi-host").unwrap(),
            "adsbexchange-com1.p.rapidapi.com"
        );
        assert!(rapid.get("api-auth").is_none());

        assert!(auth_headers("https://x", None, "h").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_once_enqueues_snapshot() {
        let (url, server) = serve_once("200 OK", SNAPSHOT).await;
        let settings = FeedSettings {
            api_key: Some("secret".into()),
            ..FeedSettings::default()
        };
        let feed = HttpFeed::new(&url, &settings).unwrap();
        let (worker, mut rx) = worker();

        assert_eq!(feed.poll_once(&worker).await.unwrap(), 1);
        let xml = String::from_utf8(rx.recv().await.unwrap()).unwrap();
        assert!(xml.contains(r#"uid="ICAO-A9EE47""#));

        let request = server.await.unwrap().to_lowercase();
        assert!(request.contains("api-auth: secret"));
    }

    #[tokio::test]
    async fn test_non_success_skips_cycle() {
        let (url, _server) = serve_once("503 Service Unavailable", "{}").await;
        let feed = HttpFeed::new(&url, &FeedSettings::default()).unwrap();
        let (worker, mut rx) = worker();
        assert_eq!(feed.poll_once(&worker).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_body_is_transient_error() {
        let (url, _server) = serve_once("200 OK", "not json").await;
        let feed = HttpFeed::new(&url, &FeedSettings::default()).unwrap();
        let (worker, _rx) = worker();
        assert!(matches!(
            feed.poll_once(&worker).await,
            Err(GatewayError::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (url, _server) = serve_once("200 OK", SNAPSHOT).await;
        let mut feed = HttpFeed::new(&url, &FeedSettings::default()).unwrap();
        let (worker, mut rx) = worker();
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { feed.run(worker, cancel).await })
        };
        rx.recv().await.unwrap();
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
