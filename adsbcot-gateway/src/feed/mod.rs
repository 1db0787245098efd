//! Feed adapters and feed URL classification.
//!
//! | Scheme              | Adapter                                   |
//! |---------------------|-------------------------------------------|
//! | `http`, `https`     | [`http::HttpFeed`] snapshot polling       |
//! | `file`              | [`file::FileFeed`] poll or change watch   |
//! | `ws`, `wss`         | [`websocket::WebSocketFeed`] stream       |
//! | `tcp`, `tcp+raw`    | [`net::NetFeed`], raw hex lines (30002)   |
//! | `tcp+beast`         | [`net::NetFeed`], beast binary (30005)    |

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use adsbcot_core::FramingMode;

use crate::error::{GatewayError, Result};
use crate::pipeline::Worker;

pub mod file;
pub mod http;
pub mod net;
pub mod websocket;

pub const DEFAULT_POLL_INTERVAL: u64 = 3;
pub const DEFAULT_RAPIDAPI_HOST: &str = "adsbexchange-com1.p.rapidapi.com";
pub const DEFAULT_TCP_MAX_RETRIES: u32 = 10;

// ---------------------------------------------------------------------------
// Feed URLs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Http,
    File(PathBuf),
    WebSocket,
    Net {
        host: String,
        port: u16,
        mode: FramingMode,
    },
}

/// A configured feed: the URL as given plus what it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUrl {
    pub url: String,
    pub source: FeedSource,
}

impl FeedUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| GatewayError::InvalidFeedUrl(url.to_string()))?;
        let scheme = scheme.to_ascii_lowercase();

        let source = match scheme.as_str() {
            "http" | "https" => FeedSource::Http,
            "ws" | "wss" => FeedSource::WebSocket,
            "file" => {
                if rest.is_empty() {
                    return Err(GatewayError::InvalidFeedUrl(url.to_string()));
                }
                FeedSource::File(PathBuf::from(rest))
            }
            s if s == "tcp" || s.starts_with("tcp+") => {
                let data_type = s.split_once('+').map_or("raw", |(_, t)| t);
                let mode = FramingMode::from_name(data_type)
                    .ok_or_else(|| GatewayError::InvalidDataType(data_type.to_string()))?;
                let (host, port) = split_host_port(rest, mode.default_port())
                    .ok_or_else(|| GatewayError::InvalidFeedUrl(url.to_string()))?;
                FeedSource::Net { host, port, mode }
            }
            other => return Err(GatewayError::UnsupportedScheme(other.to_string())),
        };

        Ok(FeedUrl {
            url: url.to_string(),
            source,
        })
    }
}

fn split_host_port(authority: &str, default_port: u16) -> Option<(String, u16)> {
    let authority = authority.split('/').next().unwrap_or("");
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (authority, default_port),
    };
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

// ---------------------------------------------------------------------------
// Adapter settings and state
// ---------------------------------------------------------------------------

/// Transport settings shared by every adapter.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub poll_interval: Duration,
    pub api_key: Option<String>,
    pub rapidapi_host: String,
    pub file_watch: bool,
    pub tcp_max_retries: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        FeedSettings {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL),
            api_key: None,
            rapidapi_host: DEFAULT_RAPIDAPI_HOST.to_string(),
            file_watch: false,
            tcp_max_retries: DEFAULT_TCP_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Connecting,
    Streaming,
    Polling,
    Error,
    Backoff,
    Stopped,
}

impl AdapterState {
    /// Whether `self -> next` is a legal transition.
    pub fn allows(self, next: AdapterState) -> bool {
        use AdapterState::*;
        match (self, next) {
            (_, Stopped) => self != Stopped,
            (Idle, Connecting) => true,
            (Connecting, Streaming | Polling | Error) => true,
            (Streaming | Polling, Error) => true,
            (Error, Backoff) => true,
            (Backoff, Connecting) => true,
            _ => false,
        }
    }
}

/// Adapter lifecycle, logged at debug.
#[derive(Debug)]
pub struct StateMachine {
    feed: String,
    state: AdapterState,
}

impl StateMachine {
    pub fn new(feed: &str) -> Self {
        StateMachine {
            feed: feed.to_string(),
            state: AdapterState::Idle,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Move to `next`. Returns false, leaving the state alone, when the
    /// transition is not allowed.
    pub fn transition(&mut self, next: AdapterState) -> bool {
        if !self.state.allows(next) {
            return false;
        }
        debug!(feed = %self.feed, from = ?self.state, to = ?next, "adapter state");
        self.state = next;
        true
    }

    /// Error then Backoff, as after a failed connection or cycle.
    pub fn fail(&mut self) {
        self.transition(AdapterState::Error);
        self.transition(AdapterState::Backoff);
    }
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FeedAdapter: Send {
    /// The feed URL, for logs.
    fn name(&self) -> &str;

    /// Run until cancelled or a fatal error. Transient errors are handled
    /// internally.
    async fn run(&mut self, worker: Worker, cancel: CancellationToken) -> Result<()>;
}

pub fn build_adapter(feed: &FeedUrl, settings: &FeedSettings) -> Result<Box<dyn FeedAdapter>> {
    Ok(match &feed.source {
        FeedSource::Http => Box::new(http::HttpFeed::new(&feed.url, settings)?),
        FeedSource::File(path) => Box::new(file::FileFeed::new(&feed.url, path.clone(), settings)),
        FeedSource::WebSocket => Box::new(websocket::WebSocketFeed::new(&feed.url)),
        FeedSource::Net { host, port, mode } => Box::new(net::NetFeed::new(
            &feed.url,
            host,
            *port,
            *mode,
            settings.tcp_max_retries,
        )),
    })
}

/// Outcome for an adapter whose queue closed under it. The sink drops the
/// queue when cancelled, so after cancellation this is a clean stop.
pub(crate) fn queue_closed(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Ok(())
    } else {
        Err(GatewayError::QueueClosed)
    }
}

/// Sleep for `period`, returning false if cancelled first.
pub(crate) async fn pause(period: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
