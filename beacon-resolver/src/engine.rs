//! The resolution engine.
//!
//! One [`Engine`] instance serves every request; it holds the store, the
//! relay pool, and the tuning config, and nothing else. Resolution is a
//! pipeline: decode, moderation gates, cache lookup, candidate assembly,
//! relay race, write-through. Feeds share the candidate and collection
//! machinery but merge many records instead of racing for one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
    dedup_relays, AuthorId, DecodeError, Pointer, PointerKind, QueryFilter, Record, RecordId,
    RelayName,
};
use beacon_relay::RelayPool;
use beacon_storage::{RecordStore, StoreError};
use rand::seq::IndexedRandom;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

use crate::config::ResolverConfig;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors a resolution can end in.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Every candidate relay was queried and none produced a matching record
    /// before the deadline.
    #[error("no relay held this {kind} within the deadline")]
    NotFound { kind: PointerKind },

    /// The record, or its author, is banned. Banned content is never served
    /// and never written back to the cache.
    #[error("record is banned: {reason}")]
    Banned { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// A resolved record together with the relays known to hold it, hinted
/// relays first.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub record: Record,
    pub relays: Vec<RelayName>,
}

/// Order a relay list so prioritized relays come first. The sort is stable,
/// so within each group the incoming order (observation order for holders)
/// is preserved.
pub fn rank_relays(mut relays: Vec<RelayName>, priority: &HashSet<RelayName>) -> Vec<RelayName> {
    relays.sort_by_key(|relay| !priority.contains(relay));
    relays
}

// ============================================================================
// ENGINE
// ============================================================================

/// Cache-first pointer resolver.
///
/// Cheap to clone; clones share the store and the relay pool.
#[derive(Clone)]
pub struct Engine {
    store: Arc<RecordStore>,
    pool: Arc<dyn RelayPool>,
    config: ResolverConfig,
}

impl Engine {
    pub fn new(store: Arc<RecordStore>, pool: Arc<dyn RelayPool>, config: ResolverConfig) -> Self {
        Self {
            store,
            pool,
            config,
        }
    }

    /// Resolve a textual pointer to a record.
    ///
    /// `explicit_hints` are relays the caller wants tried and ranked ahead of
    /// everything the pointer or the pools contribute.
    ///
    /// A cached record is served without touching the network, sliding its
    /// expiration forward. On a miss the candidate relays are raced under
    /// [`ResolverConfig::race_ceiling`]; once one relay answers, the race
    /// stays open for [`ResolverConfig::race_grace`] so slightly slower
    /// relays still count as holders, then the winning record is cached with
    /// its provenance.
    pub async fn resolve(
        &self,
        pointer_text: &str,
        explicit_hints: &[RelayName],
    ) -> Result<Resolution, ResolveError> {
        let pointer = Pointer::decode(pointer_text)?;
        self.gate_pointer(&pointer)?;
        let priority = priority_set(explicit_hints, &pointer);

        if let Some(id) = pointer.cache_id() {
            if let Some(record) = self.store.get(id)? {
                // The pointer may not name the author; the cached record
                // does, and a ban on them blocks serving from cache too.
                self.gate_record(&record)?;
                self.store.schedule_expiration(id, self.config.direct_ttl)?;
                let relays = rank_relays(self.store.relays_for(id)?, &priority);
                tracing::debug!(id = %id, "serving record from cache");
                return Ok(Resolution { record, relays });
            }
        }

        let outbox = match pointer.author() {
            Some(author) => self.author_outbox(author, pointer.hints()).await,
            None => Vec::new(),
        };
        let candidates = self.build_candidates(explicit_hints, &pointer, &outbox);
        let (winner, holders) = self
            .race(
                candidates,
                pointer.filter(),
                self.config.race_ceiling,
                self.config.race_grace,
            )
            .await;

        let Some(record) = winner else {
            return Err(ResolveError::NotFound {
                kind: pointer.kind(),
            });
        };
        self.gate_record(&record)?;

        self.store.put(&record)?;
        let merged = self.store.attach_relays(&record.id, &holders)?;
        self.store
            .schedule_expiration(&record.id, self.config.direct_ttl)?;

        tracing::debug!(
            id = %record.id,
            holders = holders.len(),
            "resolved record from relays"
        );
        Ok(Resolution {
            record,
            relays: rank_relays(merged, &priority),
        })
    }

    /// Collect an author's most recent notes from their relays.
    ///
    /// Unlike [`Engine::resolve`] this merges answers from every relay:
    /// the same note reported by several relays is deduplicated with its
    /// holder lists combined, the merged set is ordered newest first, and
    /// only the records actually returned are cached. Feed records get the
    /// shorter [`ResolverConfig::secondary_ttl`] since nobody asked for any
    /// of them directly.
    pub async fn feed(
        &self,
        pointer_text: &str,
        limit: usize,
    ) -> Result<Vec<Resolution>, ResolveError> {
        let pointer = Pointer::decode(pointer_text)?;
        let Some(author) = pointer.author().copied() else {
            return Err(ResolveError::Decode(DecodeError::Malformed {
                reason: "feeds require a pointer naming an author".to_string(),
            }));
        };
        self.gate_pointer(&pointer)?;
        let limit = limit.clamp(1, self.config.feed_limit);
        let priority = priority_set(&[], &pointer);

        let outbox = self.author_outbox(&author, pointer.hints()).await;
        let mut candidates: Vec<RelayName> = pointer.hints().to_vec();
        candidates.extend(outbox.iter().take(self.config.max_outbox_hints).cloned());
        candidates.extend(self.config.general_pool.iter().cloned());
        let candidates = self.pad_candidates(dedup_relays(candidates));

        let filter = QueryFilter::notes_of(author, limit);
        let found = self
            .collect_all(candidates, filter, self.config.feed_timeout)
            .await;

        let mut notes: Vec<(Record, Vec<RelayName>)> = found.into_values().collect();
        notes.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at));
        notes.truncate(limit);

        let mut feed = Vec::with_capacity(notes.len());
        for (record, holders) in notes {
            if self.store.record_ban_reason(&record.id)?.is_some()
                || self.store.author_ban_reason(&record.author)?.is_some()
            {
                continue;
            }
            self.store.put(&record)?;
            let merged = self.store.attach_relays(&record.id, &holders)?;
            self.store
                .schedule_expiration(&record.id, self.config.secondary_ttl)?;
            feed.push(Resolution {
                record,
                relays: rank_relays(merged, &priority),
            });
        }
        tracing::debug!(author = %author, notes = feed.len(), "collected author feed");
        Ok(feed)
    }

    // ------------------------------------------------------------------
    // Moderation gates
    // ------------------------------------------------------------------

    fn gate_pointer(&self, pointer: &Pointer) -> Result<(), ResolveError> {
        if let Some(id) = pointer.cache_id() {
            if let Some(reason) = self.store.record_ban_reason(id)? {
                return Err(ResolveError::Banned { reason });
            }
        }
        if let Some(author) = pointer.author() {
            if let Some(reason) = self.store.author_ban_reason(author)? {
                return Err(ResolveError::Banned { reason });
            }
        }
        Ok(())
    }

    /// Gate applied to a record we are about to serve. The pointer gate
    /// cannot see the author of a bare record id, so this one runs against
    /// the full record.
    fn gate_record(&self, record: &Record) -> Result<(), ResolveError> {
        if let Some(reason) = self.store.record_ban_reason(&record.id)? {
            return Err(ResolveError::Banned { reason });
        }
        if let Some(reason) = self.store.author_ban_reason(&record.author)? {
            return Err(ResolveError::Banned { reason });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Candidate assembly
    // ------------------------------------------------------------------

    /// The author's preferred relays, from cache or discovered by fetching
    /// their relay-list announcement. Best effort: failures degrade to an
    /// empty list and the resolution continues on pool relays.
    async fn author_outbox(&self, author: &AuthorId, hints: &[RelayName]) -> Vec<RelayName> {
        match self.store.outbox_relays(author) {
            Ok(Some(relays)) => return relays,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "outbox cache read failed, rediscovering");
            }
        }

        let mut candidates: Vec<RelayName> = hints.to_vec();
        candidates.extend(self.config.general_pool.iter().cloned());
        let (winner, _) = self
            .race(
                dedup_relays(candidates),
                QueryFilter::relay_list_of(*author),
                self.config.outbox_timeout,
                Duration::ZERO,
            )
            .await;

        let Some(list) = winner else {
            tracing::debug!(author = %author, "author has no discoverable relay list");
            return Vec::new();
        };
        let relays = dedup_relays(
            list.tag_values("relay")
                .filter_map(RelayName::parse)
                .filter(|relay| !relay.is_virtual())
                .collect(),
        );

        if let Err(err) = self
            .store
            .put_outbox_relays(author, &relays, self.config.outbox_ttl)
        {
            tracing::warn!(error = %err, "failed to cache author outbox");
        }
        relays
    }

    fn build_candidates(
        &self,
        explicit: &[RelayName],
        pointer: &Pointer,
        outbox: &[RelayName],
    ) -> Vec<RelayName> {
        let mut candidates: Vec<RelayName> = explicit.to_vec();
        candidates.extend(pointer.hints().iter().cloned());
        candidates.extend(outbox.iter().take(self.config.max_outbox_hints).cloned());
        let pool = match pointer.kind() {
            PointerKind::Author => &self.config.profile_pool,
            PointerKind::Raw => &self.config.id_pool,
            PointerKind::Subject | PointerKind::Entity => &self.config.general_pool,
        };
        candidates.extend(pool.iter().cloned());
        self.pad_candidates(dedup_relays(candidates))
    }

    /// Top a candidate list up to the configured minimum with random
    /// general-pool relays, so even a hintless lookup fans out.
    fn pad_candidates(&self, mut candidates: Vec<RelayName>) -> Vec<RelayName> {
        if candidates.len() >= self.config.min_candidates {
            return candidates;
        }
        let missing: Vec<&RelayName> = self
            .config
            .general_pool
            .iter()
            .filter(|relay| !candidates.contains(relay))
            .collect();
        let take = self.config.min_candidates - candidates.len();
        let mut rng = rand::rng();
        for relay in missing.choose_multiple(&mut rng, take) {
            candidates.push((*relay).clone());
        }
        candidates
    }

    // ------------------------------------------------------------------
    // Relay fan-out
    // ------------------------------------------------------------------

    /// Query every candidate concurrently and return the first matching
    /// record plus every relay that reported a match in time.
    ///
    /// The deadline starts at `ceiling`. When the first match arrives it is
    /// pulled forward to at most `grace` from that moment, giving slower
    /// holders a short window to be counted. Tasks still in flight at the
    /// deadline are aborted by dropping the set.
    async fn race(
        &self,
        candidates: Vec<RelayName>,
        filter: QueryFilter,
        ceiling: Duration,
        grace: Duration,
    ) -> (Option<Record>, Vec<RelayName>) {
        let mut tasks = JoinSet::new();
        for relay in candidates {
            let pool = Arc::clone(&self.pool);
            let filter = filter.clone();
            tasks.spawn(async move {
                let outcome = pool.query(&relay, &filter, ceiling).await;
                (relay, outcome)
            });
        }

        let mut winner: Option<Record> = None;
        let mut holders: Vec<RelayName> = Vec::new();
        let mut deadline = Instant::now() + ceiling;

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((relay, Ok(records))) => {
                            // A response only counts if it matches the query;
                            // a misbehaving relay cannot inject unrelated
                            // records.
                            let Some(record) =
                                records.into_iter().find(|r| filter.matches(r))
                            else {
                                continue;
                            };
                            holders.push(relay);
                            if winner.is_none() {
                                winner = Some(record);
                                deadline = deadline.min(Instant::now() + grace);
                            }
                        }
                        Ok((relay, Err(err))) => {
                            tracing::debug!(relay = %relay, error = %err, "relay query failed");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "relay query task panicked");
                        }
                    }
                }
                _ = sleep_until(deadline) => break,
            }
        }
        (winner, holders)
    }

    /// Query every candidate and merge all matching records, tracking which
    /// relays hold each one. Used by feeds, where every answer matters.
    async fn collect_all(
        &self,
        candidates: Vec<RelayName>,
        filter: QueryFilter,
        budget: Duration,
    ) -> HashMap<RecordId, (Record, Vec<RelayName>)> {
        let mut tasks = JoinSet::new();
        for relay in candidates {
            let pool = Arc::clone(&self.pool);
            let filter = filter.clone();
            tasks.spawn(async move {
                let outcome = pool.query(&relay, &filter, budget).await;
                (relay, outcome)
            });
        }

        let deadline = Instant::now() + budget;
        let mut found: HashMap<RecordId, (Record, Vec<RelayName>)> = HashMap::new();

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((relay, Ok(records))) => {
                            for record in records {
                                if !filter.matches(&record) {
                                    continue;
                                }
                                let id = record.id;
                                let entry = found
                                    .entry(id)
                                    .or_insert_with(move || (record, Vec::new()));
                                if !entry.1.contains(&relay) {
                                    entry.1.push(relay.clone());
                                }
                            }
                        }
                        Ok((relay, Err(err))) => {
                            tracing::debug!(relay = %relay, error = %err, "relay query failed");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "relay query task panicked");
                        }
                    }
                }
                _ = sleep_until(deadline) => break,
            }
        }
        found
    }
}

fn priority_set(explicit: &[RelayName], pointer: &Pointer) -> HashSet<RelayName> {
    explicit.iter().chain(pointer.hints()).cloned().collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_storage::StoreConfig;
    use beacon_test_utils::{
        author_id, entity, note, note_at, profile, record_id, relay, relay_list, RecordKind,
        ScriptedRelayPool,
    };
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_config(general: &[&str]) -> ResolverConfig {
        ResolverConfig {
            general_pool: general.iter().filter_map(|n| RelayName::parse(n)).collect(),
            profile_pool: Vec::new(),
            id_pool: Vec::new(),
            min_candidates: 1,
            ..ResolverConfig::default()
        }
    }

    fn engine_with(
        pool: Arc<ScriptedRelayPool>,
        config: ResolverConfig,
    ) -> (Engine, Arc<RecordStore>, TempDir) {
        let dir = TempDir::new().expect("tempdir creation should succeed");
        let mut store_config = StoreConfig::new(dir.path());
        store_config.map_size_mb = 16;
        let store = Arc::new(RecordStore::open(&store_config).expect("store should open"));
        let engine = Engine::new(Arc::clone(&store), pool, config);
        (engine, store, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_serves_without_network() {
        let pool = Arc::new(ScriptedRelayPool::new());
        let (engine, store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["general.example"]));

        let record = note(1, 2);
        store.put(&record).expect("put should succeed");
        store
            .attach_relays(&record.id, &[relay("s1.example"), relay("s2.example")])
            .expect("attach should succeed");
        store
            .schedule_expiration(&record.id, Duration::from_secs(60))
            .expect("schedule should succeed");

        let text = format!("rec-{}", record.id);
        let resolution = engine
            .resolve(&text, &[relay("s2.example")])
            .await
            .expect("cache hit should resolve");

        assert_eq!(resolution.record, record);
        let names: Vec<&str> = resolution.relays.iter().map(RelayName::as_str).collect();
        assert_eq!(names, vec!["s2.example", "s1.example"]);
        assert_eq!(pool.total_queries(), 0);

        // The hit slid the expiration from one minute out to the direct TTL.
        let next = store
            .next_expiry()
            .expect("next_expiry should read")
            .expect("an expiry should exist");
        assert!(next > Utc::now() + chrono::Duration::days(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_resolve_finishes_near_first_response() {
        let record = note(1, 2);
        let pool = Arc::new(
            ScriptedRelayPool::new()
                .with_records("fast.example", Duration::from_millis(300), vec![record.clone()])
                .with_hang("tar1.example")
                .with_hang("tar2.example"),
        );
        let (engine, store, _dir) = engine_with(
            Arc::clone(&pool),
            test_config(&["tar1.example", "tar2.example"]),
        );

        let text = format!("sub-{};fast.example", record.id);
        let start = Instant::now();
        let resolution = engine.resolve(&text, &[]).await.expect("should resolve");
        let elapsed = start.elapsed();

        assert_eq!(resolution.record, record);
        // Finishes one grace window after the 300ms answer, far short of the
        // ceiling the hanging relays would need.
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed <= Duration::from_millis(1400));

        assert_eq!(store.get(&record.id).expect("get should succeed"), Some(record.clone()));
        assert_eq!(
            store.relays_for(&record.id).expect("relays_for should succeed"),
            vec![relay("fast.example")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_first_response_wins_and_collects_holders() {
        let mut from_a = note(1, 2);
        from_a.body = "from-a".into();
        let mut from_b = from_a.clone();
        from_b.body = "from-b".into();

        let pool = Arc::new(
            ScriptedRelayPool::new()
                .with_records("a.example", Duration::from_millis(100), vec![from_a.clone()])
                .with_records("b.example", Duration::from_millis(600), vec![from_b])
                .with_records("c.example", Duration::from_millis(2000), vec![from_a.clone()]),
        );
        let (engine, _store, _dir) = engine_with(Arc::clone(&pool), test_config(&[]));

        let text = format!("rec-{}", from_a.id);
        let hints = [relay("a.example"), relay("b.example"), relay("c.example")];
        let start = Instant::now();
        let resolution = engine.resolve(&text, &hints).await.expect("should resolve");

        // a answered first so its copy is authoritative; b landed inside the
        // grace window and counts as a holder; c was after the deadline.
        assert_eq!(resolution.record.body, "from-a");
        let names: Vec<&str> = resolution.relays.iter().map(RelayName::as_str).collect();
        assert_eq!(names, vec!["a.example", "b.example"]);
        assert!(start.elapsed() <= Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hinted_relays_rank_before_pool_relays() {
        let record = note(1, 2);
        let pool = Arc::new(
            ScriptedRelayPool::new()
                .with_records("slow.example", Duration::from_millis(500), vec![record.clone()])
                .with_records("fast.example", Duration::from_millis(100), vec![record.clone()]),
        );
        let (engine, _store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["fast.example"]));

        let text = format!("sub-{};slow.example", record.id);
        let resolution = engine.resolve(&text, &[]).await.expect("should resolve");

        // fast.example won the race, but ranking puts the hinted relay first.
        let names: Vec<&str> = resolution.relays.iter().map(RelayName::as_str).collect();
        assert_eq!(names, vec!["slow.example", "fast.example"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_pointer_is_not_found() {
        let pool = Arc::new(ScriptedRelayPool::new());
        let (engine, store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["empty.example"]));

        let text = format!("sub-{}", record_id(7));
        let err = engine.resolve(&text, &[]).await.expect_err("nothing to find");
        match err {
            ResolveError::NotFound { kind } => assert_eq!(kind, PointerKind::Subject),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.record_count().expect("count should read"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_author_pointer_discovers_outbox() {
        let author = author_id(9);
        // The index relay knows the author's relay list; their home relay
        // holds the profile. The list also names a virtual aggregator that
        // must not survive discovery.
        let list = relay_list(40, 9, &["home.example", "mux.agg.example"]);
        let their_profile = profile(41, 9);
        let pool = Arc::new(
            ScriptedRelayPool::new()
                .with_records("index.example", Duration::from_millis(50), vec![list])
                .with_records(
                    "home.example",
                    Duration::from_millis(50),
                    vec![their_profile.clone()],
                ),
        );
        let (engine, store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["index.example"]));

        let resolution = engine
            .resolve(&format!("auth-{author}"), &[])
            .await
            .expect("profile should resolve via outbox");

        assert_eq!(resolution.record, their_profile);
        assert_eq!(
            store.outbox_relays(&author).expect("outbox read should succeed"),
            Some(vec![relay("home.example")])
        );
        // One relay-list query to the index, one profile query to the home.
        assert_eq!(pool.queries_for("index.example"), 1);
        assert_eq!(pool.queries_for("home.example"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbox_cache_short_circuits_discovery() {
        let author = author_id(9);
        let their_profile = profile(41, 9);
        let pool = Arc::new(ScriptedRelayPool::new().with_records(
            "home.example",
            Duration::from_millis(50),
            vec![their_profile.clone()],
        ));
        let (engine, store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["index.example"]));

        store
            .put_outbox_relays(&author, &[relay("home.example")], Duration::from_secs(3600))
            .expect("outbox seed should succeed");

        let resolution = engine
            .resolve(&format!("auth-{author}"), &[])
            .await
            .expect("profile should resolve");

        assert_eq!(resolution.record, their_profile);
        assert_eq!(pool.total_queries(), 1);
        assert_eq!(pool.queries_for("index.example"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_merges_holders_and_orders_newest_first() {
        let author = author_id(9);
        let now = Utc::now();
        let n1 = note_at(1, 9, now - chrono::Duration::minutes(10));
        let n2 = note_at(2, 9, now - chrono::Duration::minutes(60));
        let n3 = note_at(3, 9, now - chrono::Duration::minutes(30));

        let pool = Arc::new(
            ScriptedRelayPool::new()
                .with_records(
                    "home.example",
                    Duration::from_millis(100),
                    vec![n1.clone(), n2.clone()],
                )
                .with_records(
                    "spare.example",
                    Duration::from_millis(200),
                    vec![n2.clone(), n3.clone()],
                ),
        );
        let (engine, store, _dir) = engine_with(
            Arc::clone(&pool),
            test_config(&["home.example", "spare.example"]),
        );
        store
            .put_outbox_relays(
                &author,
                &[relay("home.example"), relay("spare.example")],
                Duration::from_secs(3600),
            )
            .expect("outbox seed should succeed");

        let feed = engine
            .feed(&format!("auth-{author}"), 10)
            .await
            .expect("feed should collect");

        let ids: Vec<RecordId> = feed.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![record_id(1), record_id(3), record_id(2)]);

        // n2 came from both relays; holders merged in arrival order.
        let n2_relays: Vec<&str> = feed[2].relays.iter().map(RelayName::as_str).collect();
        assert_eq!(n2_relays, vec!["home.example", "spare.example"]);

        // Everything was written through with the bulk TTL, well short of
        // the direct one.
        assert_eq!(store.record_count().expect("count should read"), 3);
        let next = store
            .next_expiry()
            .expect("next_expiry should read")
            .expect("an expiry should exist");
        assert!(next < Utc::now() + chrono::Duration::hours(25));
        assert!(next > Utc::now() + chrono::Duration::hours(23));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_limit_caps_write_through() {
        let author = author_id(9);
        let now = Utc::now();
        let n1 = note_at(1, 9, now - chrono::Duration::minutes(10));
        let n2 = note_at(2, 9, now - chrono::Duration::minutes(60));
        let n3 = note_at(3, 9, now - chrono::Duration::minutes(30));

        let pool = Arc::new(ScriptedRelayPool::new().with_records(
            "home.example",
            Duration::from_millis(100),
            vec![n1, n2, n3],
        ));
        let (engine, store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["home.example"]));
        store
            .put_outbox_relays(&author, &[relay("home.example")], Duration::from_secs(3600))
            .expect("outbox seed should succeed");

        let feed = engine
            .feed(&format!("auth-{author}"), 2)
            .await
            .expect("feed should collect");

        let ids: Vec<RecordId> = feed.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![record_id(1), record_id(3)]);
        // The oldest note fell past the limit and was not cached.
        assert!(store.get(&record_id(2)).expect("get should succeed").is_none());
        assert_eq!(store.record_count().expect("count should read"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_banned_author_fails_before_network() {
        let author = author_id(9);
        let pool = Arc::new(ScriptedRelayPool::new());
        let (engine, store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["general.example"]));
        store.ban_author(&author, "spam").expect("ban should succeed");

        let err = engine
            .resolve(&format!("auth-{author}"), &[])
            .await
            .expect_err("banned author should not resolve");
        match err {
            ResolveError::Banned { reason } => assert_eq!(reason, "spam"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pool.total_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_banned_record_fails_before_network() {
        let pool = Arc::new(ScriptedRelayPool::new());
        let (engine, store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["general.example"]));
        store
            .ban_record(&record_id(1), "takedown")
            .expect("ban should succeed");

        let err = engine
            .resolve(&format!("rec-{}", record_id(1)), &[])
            .await
            .expect_err("banned record should not resolve");
        assert!(matches!(err, ResolveError::Banned { .. }));
        assert_eq!(pool.total_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetched_record_by_banned_author_is_not_stored() {
        let record = note(1, 9);
        let pool = Arc::new(ScriptedRelayPool::new().with_records(
            "general.example",
            Duration::from_millis(50),
            vec![record.clone()],
        ));
        let (engine, store, _dir) = engine_with(
            Arc::clone(&pool),
            ResolverConfig {
                id_pool: vec![relay("general.example")],
                ..test_config(&["general.example"])
            },
        );
        store.ban_author(&author_id(9), "spam").expect("ban should succeed");

        // A bare record id names no author, so the ban only bites once the
        // record arrives and reveals who wrote it.
        let err = engine
            .resolve(&format!("rec-{}", record.id), &[])
            .await
            .expect_err("record by banned author should not serve");
        assert!(matches!(err, ResolveError::Banned { .. }));
        assert!(store.get(&record.id).expect("get should succeed").is_none());
        assert_eq!(store.record_count().expect("count should read"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_resolve_hits_cache() {
        let record = note(1, 2);
        let pool = Arc::new(ScriptedRelayPool::new().with_records(
            "general.example",
            Duration::from_millis(50),
            vec![record.clone()],
        ));
        let (engine, _store, _dir) = engine_with(
            Arc::clone(&pool),
            ResolverConfig {
                id_pool: vec![relay("general.example")],
                ..test_config(&["general.example"])
            },
        );

        let text = format!("rec-{}", record.id);
        let first = engine.resolve(&text, &[]).await.expect("cold resolve");
        let queries_after_first = pool.total_queries();
        assert!(queries_after_first >= 1);

        let second = engine.resolve(&text, &[]).await.expect("warm resolve");
        assert_eq!(second.record, first.record);
        assert_eq!(pool.total_queries(), queries_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entity_pointer_matches_by_name() {
        let author = author_id(9);
        let article = entity(5, 9, RecordKind(30023), "post");
        let pool = Arc::new(ScriptedRelayPool::new().with_records(
            "home.example",
            Duration::from_millis(50),
            vec![article.clone()],
        ));
        let (engine, store, _dir) =
            engine_with(Arc::clone(&pool), test_config(&["home.example"]));
        store
            .put_outbox_relays(&author, &[relay("home.example")], Duration::from_secs(3600))
            .expect("outbox seed should succeed");

        let resolution = engine
            .resolve(&format!("ent-{author}:30023:post"), &[])
            .await
            .expect("entity should resolve");
        assert_eq!(resolution.record, article);

        let err = engine
            .resolve(&format!("ent-{author}:30023:other"), &[])
            .await
            .expect_err("wrong name should not match");
        assert!(matches!(err, ResolveError::NotFound { kind: PointerKind::Entity }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_surfaces() {
        let pool = Arc::new(ScriptedRelayPool::new());
        let (engine, _store, _dir) = engine_with(Arc::clone(&pool), test_config(&[]));

        let err = engine.resolve("not a pointer", &[]).await.expect_err("garbage");
        assert!(matches!(err, ResolveError::Decode(_)));
        assert_eq!(pool.total_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_requires_an_author() {
        let pool = Arc::new(ScriptedRelayPool::new());
        let (engine, _store, _dir) = engine_with(Arc::clone(&pool), test_config(&[]));

        let err = engine
            .feed(&format!("rec-{}", record_id(1)), 5)
            .await
            .expect_err("a bare record id names no author");
        assert!(matches!(err, ResolveError::Decode(DecodeError::Malformed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidates_padded_to_minimum_width() {
        let pool = Arc::new(ScriptedRelayPool::new());
        let (engine, _store, _dir) = engine_with(
            Arc::clone(&pool),
            ResolverConfig {
                min_candidates: 3,
                ..test_config(&["g1.example", "g2.example", "g3.example"])
            },
        );

        // A bare id with an empty id pool has zero natural candidates, so
        // padding must supply all three.
        let _ = engine.resolve(&format!("rec-{}", record_id(7)), &[]).await;
        assert_eq!(pool.total_queries(), 3);
        let distinct: HashSet<RelayName> = pool.queried_relays().into_iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_rank_relays_puts_priority_first_and_is_stable() {
        let priority: HashSet<RelayName> =
            [relay("c.example"), relay("a.example")].into_iter().collect();
        let ranked = rank_relays(
            vec![
                relay("x.example"),
                relay("a.example"),
                relay("y.example"),
                relay("c.example"),
            ],
            &priority,
        );
        let names: Vec<&str> = ranked.iter().map(RelayName::as_str).collect();
        assert_eq!(names, vec!["a.example", "c.example", "x.example", "y.example"]);

        let none = rank_relays(vec![relay("x.example")], &HashSet::new());
        assert_eq!(none.len(), 1);
    }
}
