//! Typed identifiers and their textual form.
//!
//! A pointer is what callers hand the resolver: either a bare record id or a
//! richer reference that names an author, a kind, and relay hints biasing
//! where to look. The textual grammar is path-segment safe so a pointer can
//! ride in a URL unescaped:
//!
//! ```text
//! rec-<64 hex>                          raw record id
//! sub-<64 hex>[:<64 hex>][;h1,h2]       subject (optional author)
//! auth-<64 hex>[;h1,h2]                 author
//! ent-<64 hex>:<kind>:<name>[;h1,h2]    named entity
//! ```
//!
//! Hints are comma-separated relay names, normalized during decode.

use crate::id::{AuthorId, IdParseError, RecordId};
use crate::record::{QueryFilter, RecordKind};
use crate::relay::RelayName;
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors produced when decoding a textual identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty identifier")]
    Empty,

    #[error("unknown identifier scheme '{scheme}'")]
    UnknownScheme { scheme: String },

    #[error("invalid id in identifier: {0}")]
    InvalidId(#[from] IdParseError),

    #[error("invalid kind '{kind}' in identifier")]
    InvalidKind { kind: String },

    #[error("invalid relay hint '{hint}'")]
    InvalidHint { hint: String },

    #[error("raw record ids do not carry hints")]
    UnexpectedHints,

    #[error("malformed identifier: {reason}")]
    Malformed { reason: String },
}

// ============================================================================
// POINTER
// ============================================================================

/// Which shape of pointer a caller presented. Carried on not-found errors so
/// the caller can be told what kind of hint would help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    Raw,
    Subject,
    Author,
    Entity,
}

impl fmt::Display for PointerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PointerKind::Raw => "record id",
            PointerKind::Subject => "subject pointer",
            PointerKind::Author => "author pointer",
            PointerKind::Entity => "entity pointer",
        };
        f.write_str(name)
    }
}

/// A decoded, typed identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    /// Bare record id, no routing information.
    Raw(RecordId),
    /// A specific record, optionally with its author and relay hints.
    Subject {
        id: RecordId,
        author: Option<AuthorId>,
        hints: Vec<RelayName>,
    },
    /// An author; resolves to their profile record.
    Author {
        author: AuthorId,
        hints: Vec<RelayName>,
    },
    /// A named entity owned by an author.
    Entity {
        author: AuthorId,
        kind: RecordKind,
        name: String,
        hints: Vec<RelayName>,
    },
}

impl Pointer {
    /// Decode the textual form.
    pub fn decode(input: &str) -> Result<Self, DecodeError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DecodeError::Empty);
        }

        let (head, hints_text) = match input.split_once(';') {
            Some((head, rest)) => (head, Some(rest)),
            None => (input, None),
        };
        let hints = match hints_text {
            Some(text) => parse_hints(text)?,
            None => Vec::new(),
        };

        let (scheme, rest) = head.split_once('-').ok_or_else(|| DecodeError::UnknownScheme {
            scheme: head.to_string(),
        })?;

        match scheme {
            "rec" => {
                if !hints.is_empty() {
                    return Err(DecodeError::UnexpectedHints);
                }
                Ok(Pointer::Raw(RecordId::from_hex(rest)?))
            }
            "sub" => match rest.split_once(':') {
                Some((id, author)) => Ok(Pointer::Subject {
                    id: RecordId::from_hex(id)?,
                    author: Some(AuthorId::from_hex(author)?),
                    hints,
                }),
                None => Ok(Pointer::Subject {
                    id: RecordId::from_hex(rest)?,
                    author: None,
                    hints,
                }),
            },
            "auth" => Ok(Pointer::Author {
                author: AuthorId::from_hex(rest)?,
                hints,
            }),
            "ent" => {
                let mut parts = rest.splitn(3, ':');
                let author = parts.next().unwrap_or_default();
                let kind = parts.next().ok_or_else(|| DecodeError::Malformed {
                    reason: "entity pointer is missing its kind".to_string(),
                })?;
                let name = parts.next().ok_or_else(|| DecodeError::Malformed {
                    reason: "entity pointer is missing its name".to_string(),
                })?;
                Ok(Pointer::Entity {
                    author: AuthorId::from_hex(author)?,
                    kind: RecordKind(kind.parse().map_err(|_| DecodeError::InvalidKind {
                        kind: kind.to_string(),
                    })?),
                    name: name.to_string(),
                    hints,
                })
            }
            other => Err(DecodeError::UnknownScheme {
                scheme: other.to_string(),
            }),
        }
    }

    /// Re-emit the canonical textual form.
    pub fn encode(&self) -> String {
        let mut out = match self {
            Pointer::Raw(id) => format!("rec-{id}"),
            Pointer::Subject {
                id, author: None, ..
            } => format!("sub-{id}"),
            Pointer::Subject {
                id,
                author: Some(author),
                ..
            } => format!("sub-{id}:{author}"),
            Pointer::Author { author, .. } => format!("auth-{author}"),
            Pointer::Entity {
                author, kind, name, ..
            } => format!("ent-{author}:{kind}:{name}"),
        };
        let hints = self.hints();
        if !hints.is_empty() {
            out.push(';');
            let joined: Vec<&str> = hints.iter().map(RelayName::as_str).collect();
            out.push_str(&joined.join(","));
        }
        out
    }

    pub fn kind(&self) -> PointerKind {
        match self {
            Pointer::Raw(_) => PointerKind::Raw,
            Pointer::Subject { .. } => PointerKind::Subject,
            Pointer::Author { .. } => PointerKind::Author,
            Pointer::Entity { .. } => PointerKind::Entity,
        }
    }

    /// Relay hints embedded in the pointer, in written order.
    pub fn hints(&self) -> &[RelayName] {
        match self {
            Pointer::Raw(_) => &[],
            Pointer::Subject { hints, .. }
            | Pointer::Author { hints, .. }
            | Pointer::Entity { hints, .. } => hints,
        }
    }

    /// The author this pointer names, when it names one.
    pub fn author(&self) -> Option<&AuthorId> {
        match self {
            Pointer::Raw(_) => None,
            Pointer::Subject { author, .. } => author.as_ref(),
            Pointer::Author { author, .. } | Pointer::Entity { author, .. } => Some(author),
        }
    }

    /// The record id this pointer denotes, when derivable without any network
    /// access. Author and entity pointers resolve to whatever record the
    /// relays currently hold, so they have no offline id.
    pub fn cache_id(&self) -> Option<&RecordId> {
        match self {
            Pointer::Raw(id) | Pointer::Subject { id, .. } => Some(id),
            Pointer::Author { .. } | Pointer::Entity { .. } => None,
        }
    }

    /// The relay query that fetches this pointer's record.
    pub fn filter(&self) -> QueryFilter {
        match self {
            Pointer::Raw(id) => QueryFilter::by_id(*id),
            Pointer::Subject { id, .. } => QueryFilter::by_id(*id),
            Pointer::Author { author, .. } => QueryFilter::profile_of(*author),
            Pointer::Entity {
                author, kind, name, ..
            } => QueryFilter::entity(*author, *kind, name.clone()),
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn parse_hints(text: &str) -> Result<Vec<RelayName>, DecodeError> {
    text.split(',')
        .map(|raw| {
            RelayName::parse(raw).ok_or_else(|| DecodeError::InvalidHint {
                hint: raw.to_string(),
            })
        })
        .collect()
}
