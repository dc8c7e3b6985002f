//! Records and query filters.

use crate::id::{AuthorId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// RECORD KIND
// ============================================================================

/// Logical type tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKind(pub u32);

impl RecordKind {
    /// Author profile document.
    pub const PROFILE: RecordKind = RecordKind(0);
    /// Plain note / timeline entry.
    pub const NOTE: RecordKind = RecordKind(1);
    /// The author's preferred-relay announcement, consumed by outbox routing.
    pub const RELAY_LIST: RecordKind = RecordKind(3);
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// One key-value annotation attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub values: Vec<String>,
}

impl Tag {
    pub fn new(key: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            values,
        }
    }
}

/// An immutable, content-addressed record.
///
/// Records are created only by successful resolution from a relay and never
/// mutated afterwards; re-fetching the same id yields the same content, so
/// overwriting a stored record is an idempotent no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub author: AuthorId,
    pub kind: RecordKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub body: String,
}

impl Record {
    /// First value of every tag with the given key, in tag order.
    pub fn tag_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.key == key)
            .filter_map(|t| t.values.first().map(String::as_str))
    }

    /// First value of the `name` tag, the local name of named entities.
    pub fn entity_name(&self) -> Option<&str> {
        self.tag_values("name").next()
    }
}

// ============================================================================
// QUERY FILTER
// ============================================================================

/// A relay query: records matching every non-empty clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<RecordId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<AuthorId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<RecordKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl QueryFilter {
    /// Point lookup of a single record.
    pub fn by_id(id: RecordId) -> Self {
        Self {
            ids: vec![id],
            limit: Some(1),
            ..Self::default()
        }
    }

    /// The author's profile document.
    pub fn profile_of(author: AuthorId) -> Self {
        Self {
            authors: vec![author],
            kinds: vec![RecordKind::PROFILE],
            limit: Some(1),
            ..Self::default()
        }
    }

    /// The author's preferred-relay announcement.
    pub fn relay_list_of(author: AuthorId) -> Self {
        Self {
            authors: vec![author],
            kinds: vec![RecordKind::RELAY_LIST],
            limit: Some(1),
            ..Self::default()
        }
    }

    /// A named entity owned by `author`.
    pub fn entity(author: AuthorId, kind: RecordKind, name: impl Into<String>) -> Self {
        Self {
            authors: vec![author],
            kinds: vec![kind],
            names: vec![name.into()],
            limit: Some(1),
            ..Self::default()
        }
    }

    /// The author's most recent notes.
    pub fn notes_of(author: AuthorId, limit: usize) -> Self {
        Self {
            authors: vec![author],
            kinds: vec![RecordKind::NOTE],
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Whether a record satisfies every non-empty clause, the way a
    /// conforming relay evaluates queries. The resolver applies the same
    /// check to responses so a misbehaving relay cannot answer one query
    /// with another query's record.
    pub fn matches(&self, record: &Record) -> bool {
        (self.ids.is_empty() || self.ids.contains(&record.id))
            && (self.authors.is_empty() || self.authors.contains(&record.author))
            && (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && (self.names.is_empty()
                || record
                    .entity_name()
                    .is_some_and(|name| self.names.iter().any(|wanted| wanted == name)))
    }
}
