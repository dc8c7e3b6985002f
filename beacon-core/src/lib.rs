//! BEACON Core - Data Model
//!
//! Pure data types shared by every beacon crate: content-addressed record and
//! author identifiers, the immutable `Record` payload, normalized relay names,
//! and the typed `Pointer` identifiers the resolver consumes. No I/O lives
//! here; storage, networking, and HTTP concerns belong to the crates built on
//! top of this one.

pub mod id;
pub mod pointer;
pub mod record;
pub mod relay;

// Re-export commonly used types
pub use id::{AuthorId, IdParseError, RecordId, ID_LEN};
pub use pointer::{DecodeError, Pointer, PointerKind};
pub use record::{QueryFilter, Record, RecordKind, Tag};
pub use relay::{dedup_relays, RelayName};
