//! BEACON Storage - LMDB record cache
//!
//! Durable, memory-mapped storage for resolved records and the relay
//! provenance attached to them. Uses the heed crate (Rust bindings for LMDB).
//!
//! The store keeps four coupled facts per record:
//! - the record content itself
//! - the set of relays observed to hold it
//! - when the cache entry expires
//! - a reverse index from relay name to the records it holds
//!
//! All writes for a record happen inside a single LMDB write transaction, so
//! concurrent read-modify-write sequences (merging relay provenance, moving an
//! expiration) never interleave. Expirations live in a dedicated index ordered
//! by timestamp, which the sweeper drains in batches; scheduling an earlier
//! expiration wakes the sweeper through [`RecordStore::expiry_wake`].

pub mod store;

pub use store::{RecordStore, StoreConfig, StoreError};
