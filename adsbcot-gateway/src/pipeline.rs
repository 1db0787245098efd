//! Per-feed worker: allow-list, screening, altitude reconciliation, event
//! synthesis, and the bounded output queue.
//!
//! Every record ends in exactly one counted outcome: enqueued, rejected with
//! a reason, or dropped because the queue was full.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn, Level};

use adsbcot_core::altitude::{AltitudeCache, AltitudeFields};
use adsbcot_core::cot::{self, CotEvent, Rejection};
use adsbcot_core::known_craft::{self, KnownCraftRegistry};
use adsbcot_core::{AircraftRecord, CotConfig};

use crate::error::{GatewayError, Result};

/// Serialized events waiting for the sink.
pub type EventSender = mpsc::Sender<Vec<u8>>;
pub type EventReceiver = mpsc::Receiver<Vec<u8>>;

/// What to do when the output queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum QueuePolicy {
    /// Wait for the sink to catch up.
    #[default]
    Block,
    /// Drop the new event and count it.
    Drop,
}

/// Result of handling one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Enqueued,
    Rejected(Rejection),
    QueueFull,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Counters {
    enqueued: AtomicU64,
    queue_full: AtomicU64,
    rejected: [AtomicU64; Rejection::ALL.len()],
}

impl Counters {
    fn slot(rejection: Rejection) -> usize {
        Rejection::ALL
            .iter()
            .position(|r| *r == rejection)
            .unwrap_or(0)
    }

    pub fn record(&self, outcome: Outcome) {
        match outcome {
            Outcome::Enqueued => self.enqueued.fetch_add(1, Ordering::Relaxed),
            Outcome::QueueFull => self.queue_full.fetch_add(1, Ordering::Relaxed),
            Outcome::Rejected(r) => self.rejected[Self::slot(r)].fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn queue_full(&self) -> u64 {
        self.queue_full.load(Ordering::Relaxed)
    }

    pub fn rejected(&self, rejection: Rejection) -> u64 {
        self.rejected[Self::slot(rejection)].load(Ordering::Relaxed)
    }

    /// Log the totals, naming only the rejection reasons seen so far.
    pub fn log(&self) {
        let reasons: Vec<String> = Rejection::ALL
            .iter()
            .filter_map(|r| {
                let n = self.rejected(*r);
                (n > 0).then(|| format!("{}={n}", r.label()))
            })
            .collect();
        info!(
            enqueued = self.enqueued(),
            queue_full = self.queue_full(),
            rejected = %reasons.join(" "),
            "pipeline counters"
        );
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared by every feed worker.
pub struct PipelineState {
    altitude: Mutex<AltitudeCache>,
    registry: Option<KnownCraftRegistry>,
    pub counters: Counters,
}

impl PipelineState {
    pub fn new(registry: Option<KnownCraftRegistry>, altitude_ttl: Option<f64>) -> Self {
        PipelineState {
            altitude: Mutex::new(AltitudeCache::new(altitude_ttl)),
            registry,
            counters: Counters::default(),
        }
    }

    pub fn registry(&self) -> Option<&KnownCraftRegistry> {
        self.registry.as_ref()
    }

    fn reconcile(&self, record: &AircraftRecord, now: f64) -> AltitudeFields {
        let Some(hex) = record.icao_hex.as_deref() else {
            return AltitudeFields::default();
        };
        self.altitude
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reconcile(
                &hex.trim().to_uppercase(),
                record.altitude_baro,
                record.altitude_geom,
                now,
            )
    }

    /// Evict expired altitude references. Returns the number removed.
    pub fn prune_altitude(&self, now: f64) -> usize {
        self.altitude
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prune(now)
    }
}

fn unix_seconds(now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 1000.0
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Turns records from one feed into queued events.
#[derive(Clone)]
pub struct Worker {
    config: Arc<CotConfig>,
    state: Arc<PipelineState>,
    tx: EventSender,
    policy: QueuePolicy,
}

impl Worker {
    pub fn new(
        config: CotConfig,
        state: Arc<PipelineState>,
        tx: EventSender,
        policy: QueuePolicy,
    ) -> Self {
        Worker {
            config: Arc::new(config),
            state,
            tx,
            policy,
        }
    }

    /// Build the event for one record at `now`.
    ///
    /// Allow-list and screening rejections happen before the altitude cache
    /// is touched. The altitude band needs the reconciled estimate, so a
    /// record it rejects has already refreshed the cache.
    pub fn build(
        &self,
        record: &AircraftRecord,
        now: DateTime<Utc>,
    ) -> std::result::Result<CotEvent, Rejection> {
        let known = known_craft::admit(
            self.state.registry(),
            record,
            self.config.include_all_craft,
        )?;
        cot::screen(record, &self.config)?;
        let altitude = self.state.reconcile(record, unix_seconds(now));
        cot::synthesize(record, &self.config, known, &altitude, now)
    }

    pub async fn handle_record(&self, record: &AircraftRecord) -> Result<Outcome> {
        let outcome = match self.build(record, Utc::now()) {
            Ok(event) => {
                if tracing::enabled!(Level::TRACE) {
                    match event.to_json() {
                        Ok(json) => trace!(event = %json, "event built"),
                        Err(e) => debug!(error = %e, "event not representable as JSON"),
                    }
                }
                self.enqueue(event.to_bytes()).await?
            }
            Err(rejection) => {
                debug!(
                    icao = record.icao_hex.as_deref().unwrap_or("-"),
                    reason = rejection.label(),
                    "record rejected"
                );
                Outcome::Rejected(rejection)
            }
        };
        self.state.counters.record(outcome);
        Ok(outcome)
    }

    /// Normalize and handle one loosely-typed entry.
    pub async fn handle_value(&self, value: &Value) -> Result<Outcome> {
        match AircraftRecord::from_json(value) {
            Some(record) => self.handle_record(&record).await,
            None => {
                let outcome = Outcome::Rejected(Rejection::NotAnObject);
                self.state.counters.record(outcome);
                Ok(outcome)
            }
        }
    }

    /// Handle every entry in order. Returns how many were enqueued.
    pub async fn handle_entries<'a, I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut enqueued = 0;
        for entry in entries {
            if self.handle_value(entry).await? == Outcome::Enqueued {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    async fn enqueue(&self, event: Vec<u8>) -> Result<Outcome> {
        match self.policy {
            QueuePolicy::Block => {
                self.tx
                    .send(event)
                    .await
                    .map_err(|_| GatewayError::QueueClosed)?;
            }
            QueuePolicy::Drop => match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("output queue full, event dropped");
                    return Ok(Outcome::QueueFull);
                }
                Err(TrySendError::Closed(_)) => return Err(GatewayError::QueueClosed),
            },
        }
        Ok(Outcome::Enqueued)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
