//! BEACON Relay - Relay pool abstraction
//!
//! The seam between the resolver and the network. The resolver only ever
//! talks to a [`RelayPool`]; production wires in [`HttpRelayPool`], tests
//! wire in scripted pools with canned latencies and responses.
//!
//! A pool query is always bounded: the caller passes the timeout, and every
//! failure mode (HTTP status, undecodable body, timeout, transport) comes
//! back as a [`RelayError`] naming the relay so the resolver can race many
//! relays and attribute failures.

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{QueryFilter, Record, RelayName};
use thiserror::Error;

pub mod http;

pub use http::HttpRelayPool;

// ============================================================================
// ERRORS
// ============================================================================

/// A failed query against a single relay.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error("relay {relay} responded with status {status}")]
    Status { relay: RelayName, status: u16 },

    #[error("relay {relay} returned an undecodable response: {reason}")]
    Decode { relay: RelayName, reason: String },

    #[error("relay {relay} did not respond in time")]
    Timeout { relay: RelayName },

    #[error("transport error talking to relay {relay}: {reason}")]
    Transport { relay: RelayName, reason: String },
}

impl RelayError {
    /// The relay the failure is attributed to.
    pub fn relay(&self) -> &RelayName {
        match self {
            RelayError::Status { relay, .. }
            | RelayError::Decode { relay, .. }
            | RelayError::Timeout { relay }
            | RelayError::Transport { relay, .. } => relay,
        }
    }
}

// ============================================================================
// RELAY POOL TRAIT
// ============================================================================

/// One-shot query access to relays.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// Query a single relay for records matching `filter`.
    ///
    /// The call must return within roughly `timeout`; implementations map an
    /// elapsed deadline to [`RelayError::Timeout`] rather than hanging.
    async fn query(
        &self,
        relay: &RelayName,
        filter: &QueryFilter,
        timeout: Duration,
    ) -> Result<Vec<Record>, RelayError>;
}
