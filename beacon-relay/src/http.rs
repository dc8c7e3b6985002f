//! HTTP relay client.
//!
//! Relays expose a single `POST /query` endpoint taking a JSON
//! [`QueryFilter`] and returning a JSON array of records. One shared
//! [`reqwest::Client`] serves every relay, so connection pools and TLS
//! sessions are reused across queries.

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{QueryFilter, Record, RelayName};
use reqwest::Client;

use crate::{RelayError, RelayPool};

/// [`RelayPool`] implementation speaking plain HTTP(S) to relays.
#[derive(Debug, Clone)]
pub struct HttpRelayPool {
    client: Client,
    scheme: String,
}

impl HttpRelayPool {
    /// A pool that reaches relays over HTTPS.
    pub fn new() -> Self {
        Self::with_scheme("https")
    }

    /// A pool with an explicit URL scheme. Loopback relays in tests use
    /// `http`.
    pub fn with_scheme(scheme: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            scheme: scheme.into(),
        }
    }

    fn query_url(&self, relay: &RelayName) -> String {
        format!("{}://{}/query", self.scheme, relay.as_str())
    }
}

impl Default for HttpRelayPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayPool for HttpRelayPool {
    async fn query(
        &self,
        relay: &RelayName,
        filter: &QueryFilter,
        timeout: Duration,
    ) -> Result<Vec<Record>, RelayError> {
        let url = self.query_url(relay);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(filter)
            .send()
            .await
            .map_err(|e| classify_send_error(relay, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                relay: relay.clone(),
                status: status.as_u16(),
            });
        }

        response.json::<Vec<Record>>().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::Timeout {
                    relay: relay.clone(),
                }
            } else {
                RelayError::Decode {
                    relay: relay.clone(),
                    reason: e.to_string(),
                }
            }
        })
    }
}

fn classify_send_error(relay: &RelayName, e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::Timeout {
            relay: relay.clone(),
        }
    } else {
        RelayError::Transport {
            relay: relay.clone(),
            reason: e.to_string(),
        }
    }
}
