//! BEACON Resolver - pointer resolution engine
//!
//! Turns textual pointers into records. The engine is cache-first: a pointer
//! whose record id is derivable offline is answered from the store with zero
//! network traffic, with its expiration slid forward. On a miss the engine
//! assembles a candidate relay list (explicit hints, pointer hints, the
//! author's discovered outbox relays, a pointer-type pool, random padding)
//! and races all of them under one shared deadline. The first record to
//! arrive is authoritative; relays answering shortly after only enrich the
//! seen-on list.
//!
//! The engine owns no global state. Construct it with a store, a relay pool,
//! and a config, and share it behind an `Arc`:
//!
//! ```ignore
//! let engine = Engine::new(store, Arc::new(HttpRelayPool::new()), ResolverConfig::default());
//! let resolution = engine.resolve("auth-<hex>;home.example", &[]).await?;
//! ```

pub mod config;
pub mod engine;

pub use config::ResolverConfig;
pub use engine::{rank_relays, Engine, Resolution, ResolveError};
