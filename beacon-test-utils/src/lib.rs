//! BEACON Test Utilities
//!
//! Centralized test infrastructure for the beacon workspace:
//! - [`ScriptedRelayPool`], a relay pool with canned latencies and record sets
//! - Record and pointer fixtures for common scenarios
//! - Query accounting so tests can assert which relays were contacted
//!
//! The scripted pool behaves like a set of real relays over a fixed record
//! inventory: each relay answers any filter by matching it against its
//! scripted records, so one relay can serve both a profile query and a
//! relay-list query in the same test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use beacon_core::{
    AuthorId, DecodeError, Pointer, PointerKind, QueryFilter, Record, RecordId, RecordKind,
    RelayName, Tag, ID_LEN,
};
pub use beacon_relay::{RelayError, RelayPool};

// ============================================================================
// FIXTURES
// ============================================================================

pub fn record_id(byte: u8) -> RecordId {
    RecordId::from_bytes([byte; ID_LEN])
}

pub fn author_id(byte: u8) -> AuthorId {
    AuthorId::from_bytes([byte; ID_LEN])
}

pub fn relay(name: &str) -> RelayName {
    RelayName::parse(name).expect("fixture relay name should parse")
}

/// A plain note record.
pub fn note(id_byte: u8, author_byte: u8) -> Record {
    note_at(id_byte, author_byte, Utc::now())
}

/// A note with an explicit creation time, for feed ordering tests.
pub fn note_at(id_byte: u8, author_byte: u8, created_at: DateTime<Utc>) -> Record {
    Record {
        id: record_id(id_byte),
        author: author_id(author_byte),
        kind: RecordKind::NOTE,
        created_at,
        tags: vec![],
        body: format!("note {id_byte}"),
    }
}

/// An author profile record.
pub fn profile(id_byte: u8, author_byte: u8) -> Record {
    Record {
        id: record_id(id_byte),
        author: author_id(author_byte),
        kind: RecordKind::PROFILE,
        created_at: Utc::now(),
        tags: vec![],
        body: format!("profile of {author_byte}"),
    }
}

/// A relay-list announcement carrying one `relay` tag per preferred relay.
pub fn relay_list(id_byte: u8, author_byte: u8, relays: &[&str]) -> Record {
    Record {
        id: record_id(id_byte),
        author: author_id(author_byte),
        kind: RecordKind::RELAY_LIST,
        created_at: Utc::now(),
        tags: relays
            .iter()
            .map(|r| Tag::new("relay", vec![r.to_string()]))
            .collect(),
        body: String::new(),
    }
}

/// A named entity record carrying a `name` tag.
pub fn entity(id_byte: u8, author_byte: u8, kind: RecordKind, name: &str) -> Record {
    Record {
        id: record_id(id_byte),
        author: author_id(author_byte),
        kind,
        created_at: Utc::now(),
        tags: vec![Tag::new("name", vec![name.to_string()])],
        body: format!("entity {name}"),
    }
}

// ============================================================================
// SCRIPTED RELAY POOL
// ============================================================================

#[derive(Debug, Clone)]
enum Script {
    /// Answer after `delay` with the subset of `records` matching the filter.
    Respond {
        delay: Duration,
        records: Vec<Record>,
    },
    /// Fail after `delay` with a transport error.
    Fail { delay: Duration },
    /// Never answer; the per-query timeout fires instead.
    Hang,
}

/// Relay pool whose relays are scripts instead of sockets.
///
/// Unscripted relays answer with an empty result after a short default delay,
/// which is how the random padding relays behave in resolver tests.
///
/// # Example
///
/// ```ignore
/// let pool = ScriptedRelayPool::new()
///     .with_records("fast.example", Duration::from_millis(100), vec![record])
///     .with_failure("down.example", Duration::from_millis(10))
///     .with_hang("tar.example");
/// ```
pub struct ScriptedRelayPool {
    scripts: HashMap<RelayName, Script>,
    default_delay: Duration,
    log: Mutex<Vec<(RelayName, QueryFilter)>>,
    total: AtomicUsize,
}

impl ScriptedRelayPool {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            default_delay: Duration::from_millis(25),
            log: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
        }
    }

    /// Relay answering with `records` (filtered per query) after `delay`.
    pub fn with_records(mut self, relay_name: &str, delay: Duration, records: Vec<Record>) -> Self {
        self.scripts
            .insert(relay(relay_name), Script::Respond { delay, records });
        self
    }

    /// Relay answering with an empty result after `delay`.
    pub fn with_empty(self, relay_name: &str, delay: Duration) -> Self {
        self.with_records(relay_name, delay, vec![])
    }

    /// Relay failing with a transport error after `delay`.
    pub fn with_failure(mut self, relay_name: &str, delay: Duration) -> Self {
        self.scripts.insert(relay(relay_name), Script::Fail { delay });
        self
    }

    /// Relay that never answers.
    pub fn with_hang(mut self, relay_name: &str) -> Self {
        self.scripts.insert(relay(relay_name), Script::Hang);
        self
    }

    /// Response applied to relays no script mentions.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    // ------------------------------------------------------------------
    // Accounting
    // ------------------------------------------------------------------

    pub fn total_queries(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn queries_for(&self, relay_name: &str) -> usize {
        let wanted = relay(relay_name);
        self.log
            .lock()
            .expect("query log lock poisoned")
            .iter()
            .filter(|(r, _)| *r == wanted)
            .count()
    }

    /// Relays in the order their queries arrived.
    pub fn queried_relays(&self) -> Vec<RelayName> {
        self.log
            .lock()
            .expect("query log lock poisoned")
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    /// Every filter a relay was asked, in arrival order.
    pub fn filters_for(&self, relay_name: &str) -> Vec<QueryFilter> {
        let wanted = relay(relay_name);
        self.log
            .lock()
            .expect("query log lock poisoned")
            .iter()
            .filter(|(r, _)| *r == wanted)
            .map(|(_, f)| f.clone())
            .collect()
    }
}

impl Default for ScriptedRelayPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayPool for ScriptedRelayPool {
    async fn query(
        &self,
        relay: &RelayName,
        filter: &QueryFilter,
        timeout: Duration,
    ) -> Result<Vec<Record>, RelayError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .expect("query log lock poisoned")
            .push((relay.clone(), filter.clone()));

        let script = self.scripts.get(relay).cloned().unwrap_or(Script::Respond {
            delay: self.default_delay,
            records: vec![],
        });

        match script {
            Script::Respond { delay, records } => {
                if delay >= timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(RelayError::Timeout {
                        relay: relay.clone(),
                    });
                }
                tokio::time::sleep(delay).await;
                let mut matched: Vec<Record> = records
                    .into_iter()
                    .filter(|record| filter.matches(record))
                    .collect();
                // Conforming relays answer newest first, so a limit keeps
                // the most recent matches.
                matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                if let Some(limit) = filter.limit {
                    matched.truncate(limit);
                }
                Ok(matched)
            }
            Script::Fail { delay } => {
                if delay >= timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(RelayError::Timeout {
                        relay: relay.clone(),
                    });
                }
                tokio::time::sleep(delay).await;
                Err(RelayError::Transport {
                    relay: relay.clone(),
                    reason: "scripted failure".to_string(),
                })
            }
            Script::Hang => {
                tokio::time::sleep(timeout).await;
                Err(RelayError::Timeout {
                    relay: relay.clone(),
                })
            }
        }
    }
}
