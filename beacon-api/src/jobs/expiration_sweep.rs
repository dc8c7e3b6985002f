//! Expiration sweeper background task.
//!
//! One loop per process drains the store's expiry index. The loop sleeps
//! until the nearest pending expiration (capped by an idle interval), wakes
//! early when a writer schedules a nearer deadline, and deletes every
//! currently-expired entry in a single batch. No entry outlives its expiry by
//! more than one sweep cycle.
//!
//! A deletion error is counted and logged, never fatal: the loop retries on
//! its next wake.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_storage::RecordStore;
use chrono::Utc;
use tokio::sync::watch;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Default sleep bound when no expiration is pending.
pub const DEFAULT_IDLE_INTERVAL_SECS: u64 = 60 * 60;

/// Configuration for the expiration sweeper.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Upper bound on one sleep, so the loop re-reads the expiry index at
    /// least this often even without wake signals (default: 1 hour).
    pub idle_interval: Duration,

    /// Whether the sweeper runs at all.
    pub enabled: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(DEFAULT_IDLE_INTERVAL_SECS),
            enabled: true,
        }
    }
}

impl SweepConfig {
    /// Create SweepConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `BEACON_SWEEP_IDLE_SECS`: Idle sleep bound in seconds (default: 3600)
    /// - `BEACON_SWEEP_ENABLED`: "false" disables the sweeper (default: true)
    pub fn from_env() -> Self {
        let idle_interval = Duration::from_secs(
            std::env::var("BEACON_SWEEP_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_IDLE_INTERVAL_SECS),
        );

        let enabled = std::env::var("BEACON_SWEEP_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            idle_interval,
            enabled,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweeper activity since startup.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Sweep cycles completed (one batch deletion each)
    pub cycles: AtomicU64,

    /// Total records removed by the sweeper
    pub records_swept: AtomicU64,

    /// Early wakes triggered by a nearer deadline being scheduled
    pub early_wakes: AtomicU64,

    /// Deletion-path errors (logged, loop continued)
    pub errors: AtomicU64,
}

impl SweepMetrics {
    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            records_swept: self.records_swept.load(Ordering::Relaxed),
            early_wakes: self.early_wakes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub cycles: u64,
    pub records_swept: u64,
    pub early_wakes: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task draining expired cache entries.
///
/// Runs until the shutdown signal flips to `true`. Each iteration computes
/// the nearest pending expiration and sleeps until it, the idle bound, an
/// early-wake signal from [`RecordStore::expiry_wake`] (writers notify when
/// they schedule a nearer deadline; notifications coalesce), or shutdown,
/// whichever comes first. A due deadline triggers one batch
/// `delete_expired(now)` covering everything currently expired.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
/// let handle = tokio::spawn(expiration_sweep_task(store, SweepConfig::from_env(), shutdown_rx));
/// // ...
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await.unwrap();
/// ```
pub async fn expiration_sweep_task(
    store: Arc<RecordStore>,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::default());
    if !config.enabled {
        tracing::info!("Expiration sweeper disabled");
        return metrics;
    }

    let wake = store.expiry_wake();
    tracing::info!(
        idle_interval_secs = config.idle_interval.as_secs(),
        "Expiration sweeper started"
    );

    loop {
        let next_expiry = match store.next_expiry() {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read next expiration");
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        };

        let sleep_for = match next_expiry {
            Some(at) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(config.idle_interval),
            None => config.idle_interval,
        };

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Expiration sweeper shutting down");
                    break;
                }
            }

            // A writer registered a nearer deadline; recompute the sleep.
            _ = wake.notified() => {
                metrics.early_wakes.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            _ = tokio::time::sleep(sleep_for) => {
                sweep_once(&store, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        records_swept = snapshot.records_swept,
        early_wakes = snapshot.early_wakes,
        errors = snapshot.errors,
        "Expiration sweeper stopped"
    );

    metrics
}

/// One batch deletion pass over everything currently expired.
fn sweep_once(store: &RecordStore, metrics: &SweepMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    match store.delete_expired(Utc::now()) {
        Ok(deleted) => {
            if !deleted.is_empty() {
                metrics
                    .records_swept
                    .fetch_add(deleted.len() as u64, Ordering::Relaxed);
                tracing::info!(count = deleted.len(), "Swept expired records");
            } else {
                tracing::trace!("Sweep cycle found nothing expired");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Sweep deletion failed, retrying next cycle");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
