//! Normalized relay names.
//!
//! Relays are identified by host (optionally host/path) strings. Callers hand
//! us names in whatever shape they have — with a scheme, mixed case, trailing
//! slashes — so every name is normalized at construction and the rest of the
//! system only ever sees the canonical form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheme prefixes stripped during normalization.
const SCHEMES: [&str; 4] = ["wss://", "ws://", "https://", "http://"];

/// Host prefixes that mark a name as a virtual aggregator rather than a real
/// relay. Virtual names may appear in hints but are never recorded as holders
/// of a record.
const VIRTUAL_PREFIXES: [&str; 3] = ["mux.", "proxy.", "agg."];

/// A normalized relay name.
///
/// Canonical form: lowercase, no scheme, no trailing slash. Construct through
/// [`RelayName::parse`]; the inner string is guaranteed non-empty and free of
/// whitespace and list separators.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayName(String);

impl RelayName {
    /// Normalize `input` into a canonical relay name.
    ///
    /// Returns `None` when nothing usable remains after normalization or the
    /// name contains characters that cannot appear in a relay identity.
    pub fn parse(input: &str) -> Option<Self> {
        let mut name = input.trim();
        for scheme in SCHEMES {
            if name.len() >= scheme.len() && name[..scheme.len()].eq_ignore_ascii_case(scheme) {
                name = &name[scheme.len()..];
                break;
            }
        }
        let name = name.trim_end_matches('/').to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || c == ',' || c == ';' || c == '#' || c == '?')
        {
            return None;
        }
        Some(Self(name))
    }

    /// The canonical name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part of the name (everything before the first `/`).
    pub fn host(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Whether this name denotes a virtual aggregator view instead of a real
    /// relay. Virtual names are filtered out of record/relay associations.
    pub fn is_virtual(&self) -> bool {
        let host = self.host();
        VIRTUAL_PREFIXES.iter().any(|p| host.starts_with(p))
    }
}

impl fmt::Display for RelayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelayName({})", self.0)
    }
}

/// Deduplicate a relay list while preserving first-seen order.
pub fn dedup_relays(relays: Vec<RelayName>) -> Vec<RelayName> {
    let mut seen = std::collections::HashSet::new();
    relays
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect()
}
