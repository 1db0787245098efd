//! JSON snapshot file: interval re-read, or re-read on change.
//!
//! Change detection compares the file's modification time on a short tick.
//! A missing, empty, or half-written file skips the cycle.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adsbcot_core::record;

use super::{pause, queue_closed, AdapterState, FeedAdapter, FeedSettings, StateMachine};
use crate::error::{GatewayError, Result};
use crate::pipeline::Worker;

/// Modification-time check period in watch mode.
pub const WATCH_TICK: Duration = Duration::from_millis(500);

pub struct FileFeed {
    url: String,
    path: PathBuf,
    interval: Duration,
    watch: bool,
    last_modified: Option<SystemTime>,
    state: StateMachine,
}

impl FileFeed {
    pub fn new(url: &str, path: PathBuf, settings: &FeedSettings) -> Self {
        FileFeed {
            url: url.to_string(),
            path,
            interval: settings.poll_interval,
            watch: settings.file_watch,
            last_modified: None,
            state: StateMachine::new(url),
        }
    }

    /// Read and handle the file once. Returns the number of events enqueued.
    pub async fn read_once(&self, worker: &Worker) -> Result<usize> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "feed file missing");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            debug!(path = %self.path.display(), "feed file empty");
            return Ok(0);
        }

        let doc: Value = match serde_json::from_str(&text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "feed file is not valid JSON");
                return Ok(0);
            }
        };
        worker.handle_entries(record::message_entries(&doc)).await
    }

    /// True when the modification time moved since the last check.
    async fn changed(&mut self) -> bool {
        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .ok();
        if modified.is_none() || modified == self.last_modified {
            return false;
        }
        self.last_modified = modified;
        true
    }

    async fn cycle(&mut self, worker: &Worker) -> Result<()> {
        if self.watch && !self.changed().await {
            return Ok(());
        }
        match self.read_once(worker).await {
            Ok(enqueued) => {
                debug!(feed = %self.url, enqueued, "file read");
                Ok(())
            }
            Err(GatewayError::QueueClosed) => Err(GatewayError::QueueClosed),
            Err(e) => {
                warn!(feed = %self.url, error = %e, "file read failed, skipping cycle");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl FeedAdapter for FileFeed {
    fn name(&self) -> &str {
        &self.url
    }

    async fn run(&mut self, worker: Worker, cancel: CancellationToken) -> Result<()> {
        let period = if self.watch { WATCH_TICK } else { self.interval };
        info!(feed = %self.url, watch = self.watch, period = ?period, "reading file feed");
        self.state.transition(AdapterState::Connecting);
        self.state.transition(AdapterState::Polling);

        loop {
            let cycle = tokio::select! {
                _ = cancel.cancelled() => break,
                cycle = self.cycle(&worker) => cycle,
            };
            if cycle.is_err() {
                self.state.transition(AdapterState::Stopped);
                return queue_closed(&cancel);
            }
            if !pause(period, &cancel).await {
                break;
            }
        }

        self.state.transition(AdapterState::Stopped);
        info!(feed = %self.url, "file feed stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
