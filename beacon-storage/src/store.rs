//! LMDB-backed record store.
//!
//! # Layout
//!
//! Seven named databases inside one LMDB environment:
//!
//! - `records`        record id -> JSON record
//! - `entries`        record id -> JSON relay set + expiration
//! - `expiry`         big-endian unix seconds ++ record id -> ()
//! - `by_relay`       relay name ++ 0x00 ++ record id -> ()
//! - `banned_records` record id -> reason
//! - `banned_authors` author id -> reason
//! - `outbox`         author id -> JSON relay set + expiration
//!
//! The `expiry` key starts with the timestamp so the natural LMDB ordering is
//! expiration order; the sweeper drains a prefix of it in one transaction.
//! The `by_relay` key embeds a NUL separator so `relay.example` never matches
//! records of `relay.example.org` during prefix scans.
//!
//! # Consistency
//!
//! Every mutating operation runs inside a single write transaction. LMDB
//! serializes writers, so read-modify-write sequences such as merging relay
//! provenance never observe each other half-applied, and `entries.expires_at`
//! always has a matching `expiry` index row.

use std::ops::Bound;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{AuthorId, Record, RecordId, RelayName, ID_LEN};
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

// ============================================================================
// ERRORS
// ============================================================================

/// Error type for record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn txn_err(e: heed::Error) -> StoreError {
    StoreError::Transaction(e.to_string())
}

fn ser_err(e: serde_json::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn de_err(e: serde_json::Error) -> StoreError {
    StoreError::Deserialization(e.to_string())
}

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for opening a [`RecordStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory where LMDB files will be stored.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub map_size_mb: usize,
    /// Expiration applied when relay provenance arrives for a record that has
    /// no cache entry yet.
    pub default_ttl: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size_mb: 512,
            default_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

// ============================================================================
// KEY ENCODING
// ============================================================================

/// Stored value of `entries` and `outbox` rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRelays {
    relays: Vec<RelayName>,
    expires_at: i64,
}

/// Index keys order by timestamp, so pre-epoch values clamp to zero rather
/// than sorting after every modern timestamp in two's complement form.
fn clamp_secs(ts: i64) -> u64 {
    ts.max(0) as u64
}

fn expiry_key(at: u64, id: &RecordId) -> [u8; 8 + ID_LEN] {
    let mut key = [0u8; 8 + ID_LEN];
    key[..8].copy_from_slice(&at.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn relay_prefix(relay: &RelayName) -> Vec<u8> {
    let name = relay.as_str().as_bytes();
    let mut key = Vec::with_capacity(name.len() + 1);
    key.extend_from_slice(name);
    key.push(0);
    key
}

fn relay_key(relay: &RelayName, id: &RecordId) -> Vec<u8> {
    let mut key = relay_prefix(relay);
    key.extend_from_slice(id.as_bytes());
    key
}

/// The record id occupying the last [`ID_LEN`] bytes of an index key.
fn id_tail(key: &[u8]) -> Result<RecordId, StoreError> {
    if key.len() < ID_LEN {
        return Err(StoreError::Deserialization(
            "index key shorter than a record id".to_string(),
        ));
    }
    let mut bytes = [0u8; ID_LEN];
    bytes.copy_from_slice(&key[key.len() - ID_LEN..]);
    Ok(RecordId::from_bytes(bytes))
}

// ============================================================================
// STORE
// ============================================================================

/// LMDB-backed store for resolved records, their relay provenance, and the
/// expiration index the sweeper drains.
///
/// # Example
///
/// ```ignore
/// use beacon_storage::{RecordStore, StoreConfig};
///
/// let store = RecordStore::open(&StoreConfig::new("/var/lib/beacon"))?;
/// store.put(&record)?;
/// store.attach_relays(&record.id, &observed_relays)?;
/// store.schedule_expiration(&record.id, Duration::from_secs(7 * 24 * 60 * 60))?;
/// ```
pub struct RecordStore {
    env: Env,
    records: Database<Bytes, Bytes>,
    entries: Database<Bytes, Bytes>,
    expiry: Database<Bytes, Bytes>,
    by_relay: Database<Bytes, Bytes>,
    banned_records: Database<Bytes, Bytes>,
    banned_authors: Database<Bytes, Bytes>,
    outbox: Database<Bytes, Bytes>,
    default_ttl: Duration,
    /// Notified when a newly scheduled expiration lands before every
    /// previously known one. `Notify` stores at most one permit, so a burst
    /// of schedules coalesces into a single sweeper wake.
    expiry_wake: Arc<Notify>,
    /// Mirror of the nearest known expiration, `u64::MAX` when none. Gates
    /// [`Self::expiry_wake`] notifications; the authoritative value always
    /// comes from the `expiry` index itself.
    nearest_expiry: AtomicU64,
}

impl RecordStore {
    /// Open (or create) the store at `config.path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the LMDB
    /// environment cannot be opened, or a database cannot be created.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size_mb * 1024 * 1024)
                .max_dbs(7)
                .open(&config.path)
        }
        .map_err(|e| StoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let records = create_db(&env, &mut wtxn, "records")?;
        let entries = create_db(&env, &mut wtxn, "entries")?;
        let expiry = create_db(&env, &mut wtxn, "expiry")?;
        let by_relay = create_db(&env, &mut wtxn, "by_relay")?;
        let banned_records = create_db(&env, &mut wtxn, "banned_records")?;
        let banned_authors = create_db(&env, &mut wtxn, "banned_authors")?;
        let outbox = create_db(&env, &mut wtxn, "outbox")?;
        wtxn.commit().map_err(txn_err)?;

        let store = Self {
            env,
            records,
            entries,
            expiry,
            by_relay,
            banned_records,
            banned_authors,
            outbox,
            default_ttl: config.default_ttl,
            expiry_wake: Arc::new(Notify::new()),
            nearest_expiry: AtomicU64::new(u64::MAX),
        };
        store.refresh_nearest()?;
        Ok(store)
    }

    /// Handle the sweeper waits on between sweeps.
    pub fn expiry_wake(&self) -> Arc<Notify> {
        Arc::clone(&self.expiry_wake)
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Fetch a cached record. Does not touch its expiration.
    pub fn get(&self, id: &RecordId) -> Result<Option<Record>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.records.get(&rtxn, id.as_bytes()).map_err(txn_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes).map_err(de_err)?)),
            None => Ok(None),
        }
    }

    /// Store a record. Records are immutable, so overwriting an existing one
    /// with the same id is a no-op in effect and this is safe to call from
    /// concurrent resolutions of the same pointer.
    pub fn put(&self, record: &Record) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(ser_err)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.records
            .put(&mut wtxn, record.id.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    /// Number of cached records.
    pub fn record_count(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.records.len(&rtxn).map_err(txn_err)
    }

    // ------------------------------------------------------------------
    // Relay provenance
    // ------------------------------------------------------------------

    /// Merge newly observed relays into a record's provenance and return the
    /// full merged set.
    ///
    /// Virtual relays (aggregator frontends) are dropped, duplicates are
    /// ignored, and the existing order is preserved with new relays appended.
    /// A record without a cache entry gets one with the default expiration.
    pub fn attach_relays(
        &self,
        id: &RecordId,
        observed: &[RelayName],
    ) -> Result<Vec<RelayName>, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let existing = self.read_row(&wtxn, self.entries, id.as_bytes())?;
        let (mut merged, expires_at, is_new) = match existing {
            Some(row) => (row.relays, row.expires_at, false),
            None => {
                let expires =
                    Utc::now() + chrono::Duration::seconds(self.default_ttl.as_secs() as i64);
                (Vec::new(), expires.timestamp(), true)
            }
        };

        let mut added = Vec::new();
        for relay in observed {
            if relay.is_virtual() || merged.contains(relay) {
                continue;
            }
            merged.push(relay.clone());
            added.push(relay.clone());
        }

        // Nothing new and the entry already exists: skip the write entirely.
        if added.is_empty() && !is_new {
            return Ok(merged);
        }

        for relay in &added {
            self.by_relay
                .put(&mut wtxn, &relay_key(relay, id), &[])
                .map_err(txn_err)?;
        }
        let row = CachedRelays {
            relays: merged.clone(),
            expires_at,
        };
        self.entries
            .put(&mut wtxn, id.as_bytes(), &serde_json::to_vec(&row).map_err(ser_err)?)
            .map_err(txn_err)?;
        if is_new {
            self.expiry
                .put(&mut wtxn, &expiry_key(clamp_secs(expires_at), id), &[])
                .map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;

        if is_new {
            self.note_new_expiry(clamp_secs(expires_at));
        }
        Ok(merged)
    }

    /// Relays known to hold a record, oldest observation first.
    pub fn relays_for(&self, id: &RecordId) -> Result<Vec<RelayName>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self
            .read_row(&rtxn, self.entries, id.as_bytes())?
            .map(|row| row.relays)
            .unwrap_or_default())
    }

    /// Cached record ids a relay is known to hold, up to `limit`.
    pub fn ids_by_relay(&self, relay: &RelayName, limit: usize) -> Result<Vec<RecordId>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let prefix = relay_prefix(relay);
        let mut ids = Vec::new();
        let iter = self
            .by_relay
            .prefix_iter(&rtxn, prefix.as_slice())
            .map_err(txn_err)?;
        for item in iter {
            if ids.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(txn_err)?;
            ids.push(id_tail(key)?);
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Expiration
    // ------------------------------------------------------------------

    /// Move a record's expiration to `now + ttl`, waking the sweeper when the
    /// new deadline is nearer than every previously known one. Creates an
    /// empty cache entry when the record has none.
    pub fn schedule_expiration(&self, id: &RecordId, ttl: Duration) -> Result<(), StoreError> {
        let expires_at =
            (Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64)).timestamp();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let row = match self.read_row(&wtxn, self.entries, id.as_bytes())? {
            Some(old) => {
                self.expiry
                    .delete(&mut wtxn, &expiry_key(clamp_secs(old.expires_at), id))
                    .map_err(txn_err)?;
                CachedRelays {
                    relays: old.relays,
                    expires_at,
                }
            }
            None => CachedRelays {
                relays: Vec::new(),
                expires_at,
            },
        };
        self.entries
            .put(&mut wtxn, id.as_bytes(), &serde_json::to_vec(&row).map_err(ser_err)?)
            .map_err(txn_err)?;
        self.expiry
            .put(&mut wtxn, &expiry_key(clamp_secs(expires_at), id), &[])
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.note_new_expiry(clamp_secs(expires_at));
        Ok(())
    }

    /// The instant the next cache entry expires, if any are scheduled.
    pub fn next_expiry(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.expiry.first(&rtxn).map_err(txn_err)? {
            Some((key, _)) if key.len() >= 8 => {
                let mut secs = [0u8; 8];
                secs.copy_from_slice(&key[..8]);
                Ok(DateTime::from_timestamp(u64::from_be_bytes(secs) as i64, 0))
            }
            _ => Ok(None),
        }
    }

    /// Delete every record whose expiration is at or before `now`, together
    /// with its cache entry and relay index rows, in one transaction.
    ///
    /// Returns the ids that were removed.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<RecordId>, StoreError> {
        let cutoff = expiry_key(clamp_secs(now.timestamp()), &RecordId::from_bytes([0xff; ID_LEN]));
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut batch: Vec<(Vec<u8>, RecordId)> = Vec::new();
        {
            let bounds: (Bound<&[u8]>, Bound<&[u8]>) =
                (Bound::Unbounded, Bound::Included(&cutoff[..]));
            let iter = self.expiry.range(&wtxn, &bounds).map_err(txn_err)?;
            for item in iter {
                let (key, _) = item.map_err(txn_err)?;
                batch.push((key.to_vec(), id_tail(key)?));
            }
        }

        let mut removed = Vec::with_capacity(batch.len());
        for (key, id) in batch {
            if let Some(row) = self.read_row(&wtxn, self.entries, id.as_bytes())? {
                for relay in &row.relays {
                    self.by_relay
                        .delete(&mut wtxn, &relay_key(relay, &id))
                        .map_err(txn_err)?;
                }
            }
            self.entries.delete(&mut wtxn, id.as_bytes()).map_err(txn_err)?;
            self.records.delete(&mut wtxn, id.as_bytes()).map_err(txn_err)?;
            self.expiry.delete(&mut wtxn, &key).map_err(txn_err)?;
            removed.push(id);
        }
        wtxn.commit().map_err(txn_err)?;

        self.refresh_nearest()?;
        Ok(removed)
    }

    /// Drop a record, its cache entry, its expiration, and its relay index
    /// rows. Succeeds whether or not the record exists.
    pub fn forget(&self, id: &RecordId) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.forget_in(&mut wtxn, id)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Moderation
    // ------------------------------------------------------------------

    /// Ban a record and evict any cached copy in the same transaction.
    pub fn ban_record(&self, id: &RecordId, reason: &str) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.banned_records
            .put(&mut wtxn, id.as_bytes(), reason.as_bytes())
            .map_err(txn_err)?;
        self.forget_in(&mut wtxn, id)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    /// Lift a record ban. Returns whether a ban was present.
    pub fn unban_record(&self, id: &RecordId) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let removed = self
            .banned_records
            .delete(&mut wtxn, id.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }

    pub fn record_ban_reason(&self, id: &RecordId) -> Result<Option<String>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self
            .banned_records
            .get(&rtxn, id.as_bytes())
            .map_err(txn_err)?
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Ban an author. Cached records stay on disk until they expire; the
    /// resolver refuses to serve them while the ban is in place.
    pub fn ban_author(&self, author: &AuthorId, reason: &str) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.banned_authors
            .put(&mut wtxn, author.as_bytes(), reason.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    /// Lift an author ban. Returns whether a ban was present.
    pub fn unban_author(&self, author: &AuthorId) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let removed = self
            .banned_authors
            .delete(&mut wtxn, author.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }

    pub fn author_ban_reason(&self, author: &AuthorId) -> Result<Option<String>, StoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self
            .banned_authors
            .get(&rtxn, author.as_bytes())
            .map_err(txn_err)?
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
    }

    // ------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------

    /// An author's cached preferred relays, expired lazily on read.
    pub fn outbox_relays(&self, author: &AuthorId) -> Result<Option<Vec<RelayName>>, StoreError> {
        let now = Utc::now().timestamp();
        let row = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            self.read_row(&rtxn, self.outbox, author.as_bytes())?
        };
        match row {
            Some(row) if row.expires_at > now => Ok(Some(row.relays)),
            Some(_) => {
                let mut wtxn = self.env.write_txn().map_err(txn_err)?;
                self.outbox
                    .delete(&mut wtxn, author.as_bytes())
                    .map_err(txn_err)?;
                wtxn.commit().map_err(txn_err)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Cache an author's preferred relays for `ttl`.
    pub fn put_outbox_relays(
        &self,
        author: &AuthorId,
        relays: &[RelayName],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let row = CachedRelays {
            relays: relays.to_vec(),
            expires_at: (Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64)).timestamp(),
        };
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.outbox
            .put(&mut wtxn, author.as_bytes(), &serde_json::to_vec(&row).map_err(ser_err)?)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read_row(
        &self,
        txn: &RoTxn<'_>,
        db: Database<Bytes, Bytes>,
        key: &[u8],
    ) -> Result<Option<CachedRelays>, StoreError> {
        match db.get(txn, key).map_err(txn_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes).map_err(de_err)?)),
            None => Ok(None),
        }
    }

    fn forget_in(&self, wtxn: &mut RwTxn<'_>, id: &RecordId) -> Result<(), StoreError> {
        if let Some(row) = self.read_row(wtxn, self.entries, id.as_bytes())? {
            for relay in &row.relays {
                self.by_relay
                    .delete(wtxn, &relay_key(relay, id))
                    .map_err(txn_err)?;
            }
            self.expiry
                .delete(wtxn, &expiry_key(clamp_secs(row.expires_at), id))
                .map_err(txn_err)?;
            self.entries.delete(wtxn, id.as_bytes()).map_err(txn_err)?;
        }
        self.records.delete(wtxn, id.as_bytes()).map_err(txn_err)?;
        Ok(())
    }

    fn note_new_expiry(&self, at: u64) {
        let prev = self.nearest_expiry.fetch_min(at, Ordering::AcqRel);
        if at < prev {
            self.expiry_wake.notify_one();
        }
    }

    /// Rebuild the nearest-expiry mirror from the index. A schedule racing
    /// this refresh at worst produces one spurious sweeper wake.
    fn refresh_nearest(&self) -> Result<(), StoreError> {
        self.nearest_expiry.store(u64::MAX, Ordering::Release);
        if let Some(at) = self.next_expiry()? {
            self.nearest_expiry
                .fetch_min(clamp_secs(at.timestamp()), Ordering::AcqRel);
        }
        Ok(())
    }
}

fn create_db(
    env: &Env,
    wtxn: &mut RwTxn<'_>,
    name: &str,
) -> Result<Database<Bytes, Bytes>, StoreError> {
    env.create_database(wtxn, Some(name))
        .map_err(|e| StoreError::DbOpen(e.to_string()))
}
