//! Admission controller middleware.
//!
//! Coalesces concurrent requests for the same resource so a hot identifier
//! triggers at most one relay fan-out at a time. Requests hash to one of a
//! fixed number of buckets; the first request into a free bucket becomes the
//! leader and runs the real pipeline, later arrivals wait for the leader and
//! are then redirected back to the same resource, on the assumption a
//! fronting cache now holds the leader's response.
//!
//! Every outcome is a typed value, never a panic: a follower that waits too
//! long gets 504, a bucket over capacity rejects with 503 without consuming a
//! wait slot, and a panic inside the leader's pipeline is recovered here,
//! logged with its context, and answered as a plain 500. Bucket release and
//! ticket removal happen via drop guards, so a disconnected caller (whose
//! future is simply dropped) can never leave a bucket locked.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::Mutex;

use crate::error::ApiError;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Default number of admission buckets.
pub const DEFAULT_BUCKET_COUNT: usize = 32;

/// Default bound on a follower's wait for the bucket lock.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(6);

/// Default cap on live requests per bucket before fast-rejecting.
pub const DEFAULT_MAX_LIVE: u32 = 2;

/// Configuration for the admission controller.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Number of pre-allocated buckets. Fixed for the process lifetime.
    pub bucket_count: usize,

    /// How long a follower may wait for the bucket lock before 504.
    pub wait_timeout: Duration,

    /// A request arriving at a bucket whose live counter already exceeds
    /// this is rejected with 503 without joining the wait.
    pub max_live: u32,

    /// Path prefixes that bypass the controller entirely (static or
    /// non-resolving endpoints).
    pub skip_prefixes: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            bucket_count: DEFAULT_BUCKET_COUNT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            max_live: DEFAULT_MAX_LIVE,
            skip_prefixes: vec![
                "/health".to_string(),
                "/relay/".to_string(),
                "/admin/".to_string(),
                "/favicon.ico".to_string(),
                "/robots.txt".to_string(),
                "/static/".to_string(),
            ],
        }
    }
}

impl AdmissionConfig {
    /// Create AdmissionConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `BEACON_ADMISSION_BUCKETS`: Number of buckets (default: 32)
    /// - `BEACON_ADMISSION_WAIT_SECS`: Follower wait bound in seconds (default: 6)
    /// - `BEACON_ADMISSION_MAX_LIVE`: Live-request cap per bucket (default: 2)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bucket_count = std::env::var("BEACON_ADMISSION_BUCKETS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.bucket_count);

        let wait_timeout = std::env::var("BEACON_ADMISSION_WAIT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.wait_timeout);

        let max_live = std::env::var("BEACON_ADMISSION_MAX_LIVE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_live);

        Self {
            bucket_count,
            wait_timeout,
            max_live,
            skip_prefixes: defaults.skip_prefixes,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for admission outcomes since startup.
#[derive(Debug, Default)]
pub struct AdmissionMetrics {
    /// Requests that became leaders and ran the pipeline
    pub leaders: AtomicU64,

    /// Followers redirected after the leader finished
    pub redirects: AtomicU64,

    /// Followers that hit the wait bound
    pub timeouts: AtomicU64,

    /// Requests fast-rejected over the live cap
    pub overloads: AtomicU64,

    /// Panics recovered at the controller boundary
    pub panics: AtomicU64,
}

impl AdmissionMetrics {
    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            leaders: self.leaders.load(Ordering::Relaxed),
            redirects: self.redirects.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            overloads: self.overloads.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of admission counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub leaders: u64,
    pub redirects: u64,
    pub timeouts: u64,
    pub overloads: u64,
    pub panics: u64,
}

// ============================================================================
// STATE
// ============================================================================

/// One mutual-exclusion slot. Pre-allocated, never grows.
struct AdmissionBucket {
    gate: Mutex<()>,
    live: AtomicU32,
}

struct AdmissionInner {
    buckets: Vec<AdmissionBucket>,
    /// In-flight tickets: request sequence number to bucket index. A ticket
    /// exists only between a leader's admission and its completion.
    tickets: DashMap<u64, usize>,
    next_seq: AtomicU64,
    config: AdmissionConfig,
    metrics: AdmissionMetrics,
}

/// Shared state for the admission middleware. Cheap to clone.
#[derive(Clone)]
pub struct AdmissionState {
    inner: Arc<AdmissionInner>,
}

/// Request extension marking a request already admitted, so re-entrant
/// dispatch through the same middleware stack does not register twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSeq(pub u64);

impl AdmissionState {
    pub fn new(config: AdmissionConfig) -> Self {
        let buckets = (0..config.bucket_count)
            .map(|_| AdmissionBucket {
                gate: Mutex::new(()),
                live: AtomicU32::new(0),
            })
            .collect();
        Self {
            inner: Arc::new(AdmissionInner {
                buckets,
                tickets: DashMap::new(),
                next_seq: AtomicU64::new(1),
                config,
                metrics: AdmissionMetrics::default(),
            }),
        }
    }

    /// Outcome counters.
    pub fn metrics(&self) -> AdmissionSnapshot {
        self.inner.metrics.snapshot()
    }

    /// The bucket a path hashes to.
    pub fn bucket_index(&self, path: &str) -> usize {
        (fnv1a(path.as_bytes()) % self.inner.buckets.len() as u64) as usize
    }

    /// Live requests (leader plus waiting followers) on a path's bucket.
    pub fn live_requests(&self, path: &str) -> u32 {
        self.inner.buckets[self.bucket_index(path)]
            .live
            .load(Ordering::Acquire)
    }

    /// Number of leader tickets currently registered.
    pub fn in_flight(&self) -> usize {
        self.inner.tickets.len()
    }

    fn should_skip(&self, path: &str) -> bool {
        self.inner
            .config
            .skip_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }
}

/// FNV-1a. Cheap and deliberately collision-tolerant; colliding paths just
/// share a bucket.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ============================================================================
// GUARDS
// ============================================================================

/// Decrements the bucket's live counter on drop, including when the request
/// future is dropped by a disconnected caller.
struct LiveGuard {
    inner: Arc<AdmissionInner>,
    index: usize,
}

impl LiveGuard {
    fn new(inner: Arc<AdmissionInner>, index: usize) -> Self {
        inner.buckets[index].live.fetch_add(1, Ordering::AcqRel);
        Self { inner, index }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.inner.buckets[self.index]
            .live
            .fetch_sub(1, Ordering::AcqRel);
    }
}

/// Removes the leader's in-flight ticket on drop.
struct TicketGuard {
    inner: Arc<AdmissionInner>,
    seq: u64,
}

impl TicketGuard {
    fn new(inner: Arc<AdmissionInner>, seq: u64, index: usize) -> Self {
        inner.tickets.insert(seq, index);
        Self { inner, seq }
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        self.inner.tickets.remove(&self.seq);
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// What the controller decided for one request. The wrapping middleware
/// switches on this value; no outcome is ever signalled by unwinding.
enum AdmissionOutcome {
    /// This request led and ran the pipeline; its response is attached.
    Leader(Response),
    /// A leader finished while this request waited; point the caller back
    /// at the resource.
    Redirect,
    /// The wait bound expired before the leader finished.
    Timeout,
    /// The bucket was over its live cap; rejected without joining the wait.
    Overload,
    /// The leader's pipeline panicked and was recovered here.
    Internal,
}

/// Axum middleware implementing the admission state machine.
///
/// Wrap the router with `middleware::from_fn_with_state(state, admission_middleware)`.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if state.should_skip(&path) {
        return next.run(request).await;
    }
    if request.extensions().get::<AdmissionSeq>().is_some() {
        // Already admitted upstream in this middleware stack.
        return next.run(request).await;
    }

    let inner = Arc::clone(&state.inner);
    let index = state.bucket_index(&path);
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    match admit(&inner, index, &path, request, next).await {
        AdmissionOutcome::Leader(response) => {
            inner.metrics.leaders.fetch_add(1, Ordering::Relaxed);
            response
        }
        AdmissionOutcome::Redirect => {
            inner.metrics.redirects.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(path = %path, bucket = index, "admission follower redirected");
            redirect_to(&target)
        }
        AdmissionOutcome::Timeout => {
            inner.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(path = %path, bucket = index, "admission follower timed out");
            ApiError::admission_timeout().into_response()
        }
        AdmissionOutcome::Overload => {
            inner.metrics.overloads.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(path = %path, bucket = index, "admission bucket over capacity");
            ApiError::overloaded().into_response()
        }
        AdmissionOutcome::Internal => {
            inner.metrics.leaders.fetch_add(1, Ordering::Relaxed);
            inner.metrics.panics.fetch_add(1, Ordering::Relaxed);
            ApiError::from_code(crate::error::ErrorCode::InternalError).into_response()
        }
    }
}

/// Run one request through the bucket state machine.
async fn admit(
    inner: &Arc<AdmissionInner>,
    index: usize,
    path: &str,
    mut request: Request,
    next: Next,
) -> AdmissionOutcome {
    let bucket = &inner.buckets[index];

    // Fast-reject before consuming a wait slot.
    if bucket.live.load(Ordering::Acquire) > inner.config.max_live {
        return AdmissionOutcome::Overload;
    }

    let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
    request.extensions_mut().insert(AdmissionSeq(seq));
    let _live = LiveGuard::new(Arc::clone(inner), index);

    match bucket.gate.try_lock() {
        Ok(_gate) => {
            // Leader: run the real pipeline, recover any panic at this
            // boundary. The gate guard and ticket drop on every exit path.
            let _ticket = TicketGuard::new(Arc::clone(inner), seq, index);
            tracing::debug!(path = %path, bucket = index, seq, "admission leader");

            let method = request.method().clone();
            let origin = request
                .headers()
                .get(header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            match std::panic::AssertUnwindSafe(next.run(request))
                .catch_unwind()
                .await
            {
                Ok(response) => AdmissionOutcome::Leader(response),
                Err(panic) => {
                    let backtrace = std::backtrace::Backtrace::force_capture();
                    tracing::error!(
                        panic = %panic_message(&panic),
                        path = %path,
                        method = %method,
                        origin = origin.as_deref().unwrap_or("-"),
                        backtrace = %backtrace,
                        "panic recovered in request pipeline"
                    );
                    AdmissionOutcome::Internal
                }
            }
        }
        Err(_) => {
            // Follower: wait for the leader, bounded. On acquire the work is
            // already done, so release immediately.
            match tokio::time::timeout(inner.config.wait_timeout, bucket.gate.lock()).await {
                Ok(gate) => {
                    drop(gate);
                    AdmissionOutcome::Redirect
                }
                Err(_) => AdmissionOutcome::Timeout,
            }
        }
    }
}

/// 302 back to the request's own URI, query preserved.
fn redirect_to(target: &str) -> Response {
    match HeaderValue::from_str(target) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(_) => StatusCode::FOUND.into_response(),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
