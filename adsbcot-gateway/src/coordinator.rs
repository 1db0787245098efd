//! Runs every feed adapter and the sink as concurrent tasks.
//!
//! All tasks share one bounded output queue and one `PipelineState`. The
//! first fatal error cancels the rest and is returned once every task has
//! wound down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use adsbcot_core::CotConfig;

use crate::error::{GatewayError, Result};
use crate::feed::{self, FeedSettings, FeedUrl};
use crate::pipeline::{PipelineState, QueuePolicy, Worker};
use crate::sink::{self, SinkTarget};

pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

pub struct Coordinator {
    pub feeds: Vec<FeedUrl>,
    pub settings: FeedSettings,
    pub config: CotConfig,
    pub sink: SinkTarget,
    pub queue_size: usize,
    pub policy: QueuePolicy,
    pub state: Arc<PipelineState>,
    pub stats_interval: Duration,
}

type TaskResult = (String, Result<()>);

impl Coordinator {
    /// Run until Ctrl-C or the first fatal error.
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves, every task ends, or a task fails.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.feeds.is_empty() {
            return Err(GatewayError::config("no feed URLs configured"));
        }
        // build every adapter before spawning so a bad URL fails fast
        let adapters = self
            .feeds
            .iter()
            .map(|feed| feed::build_adapter(feed, &self.settings).map(|a| (feed, a)))
            .collect::<Result<Vec<_>>>()?;

        let (tx, rx) = mpsc::channel(self.queue_size.max(1));
        let cancel = CancellationToken::new();
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        {
            let target = self.sink.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = sink::run(target, rx, cancel).await.map(|_| ());
                ("sink".to_string(), result)
            });
        }

        for (feed, mut adapter) in adapters {
            let worker = Worker::new(
                self.config.for_feed(&feed.url),
                self.state.clone(),
                tx.clone(),
                self.policy,
            );
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let name = adapter.name().to_string();
                let result = adapter.run(worker, cancel).await;
                (name, result)
            });
        }
        // the sink sees the queue close once every adapter has stopped
        drop(tx);
        info!(feeds = self.feeds.len(), sink = ?self.sink, "gateway running");

        let mut first_error: Option<GatewayError> = None;
        let mut stats = tokio::time::interval(self.stats_interval);
        stats.tick().await;
        tokio::pin!(shutdown);
        let mut shutting_down = false;

        loop {
            tokio::select! {
                _ = &mut shutdown, if !shutting_down => {
                    info!("shutdown requested");
                    shutting_down = true;
                    cancel.cancel();
                }
                _ = stats.tick() => {
                    self.state.counters.log();
                    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
                    let evicted = self.state.prune_altitude(now);
                    if evicted > 0 {
                        debug!(evicted, "altitude references expired");
                    }
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((name, Ok(())))) => info!(task = %name, "task finished"),
                    Some(Ok((name, Err(GatewayError::QueueClosed)))) if cancel.is_cancelled() => {
                        debug!(task = %name, "queue closed during shutdown");
                    }
                    Some(Ok((name, Err(e)))) => {
                        error!(task = %name, error = %e, "task failed");
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        cancel.cancel();
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "task panicked or was aborted");
                        cancel.cancel();
                    }
                },
            }
        }

        self.state.counters.log();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
