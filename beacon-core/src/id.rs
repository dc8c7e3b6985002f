//! Content-addressed identifiers.
//!
//! Records and authors are both identified by 32-byte values rendered as
//! 64-character lowercase hex. The two are distinct types so a record id can
//! never be passed where an author id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of raw bytes in an identifier.
pub const ID_LEN: usize = 32;

/// Errors produced when parsing an identifier from hex.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error("expected {expected} hex characters, got {got}")]
    BadLength { expected: usize, got: usize },

    #[error("invalid hex digit in identifier")]
    BadDigit,
}

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            /// Wrap raw identifier bytes.
            pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            /// Parse from 64 lowercase or uppercase hex characters.
            pub fn from_hex(input: &str) -> Result<Self, IdParseError> {
                if input.len() != ID_LEN * 2 {
                    return Err(IdParseError::BadLength {
                        expected: ID_LEN * 2,
                        got: input.len(),
                    });
                }
                let mut bytes = [0u8; ID_LEN];
                hex::decode_to_slice(input, &mut bytes)
                    .map_err(|_| IdParseError::BadDigit)?;
                Ok(Self(bytes))
            }

            /// Raw bytes, used as storage keys.
            pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            /// Lowercase hex rendering.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id! {
    /// Identity of a record: the content-addressed hash of its payload.
    RecordId
}

define_id! {
    /// Identity of an author: the stable key records are attributed to.
    AuthorId
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hex() -> String {
        "ab".repeat(ID_LEN)
    }

    #[test]
    fn test_from_hex_roundtrip() {
        let hex = sample_hex();
        let id = RecordId::from_hex(&hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(id.to_string(), hex);
    }

    #[test]
    fn test_from_hex_accepts_uppercase() {
        let id = RecordId::from_hex(&sample_hex().to_uppercase()).unwrap();
        assert_eq!(id.to_hex(), sample_hex());
    }

    #[test]
    fn test_from_hex_rejects_bad_length() {
        let err = RecordId::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            IdParseError::BadLength {
                expected: 64,
                got: 4
            }
        );
    }

    #[test]
    fn test_from_hex_rejects_bad_digit() {
        let mut hex = sample_hex();
        hex.replace_range(0..2, "zz");
        assert_eq!(RecordId::from_hex(&hex).unwrap_err(), IdParseError::BadDigit);
    }

    #[test]
    fn test_record_and_author_ids_are_distinct_types() {
        // Compile-time property; just exercise both constructors.
        let bytes = [7u8; ID_LEN];
        let record = RecordId::from_bytes(bytes);
        let author = AuthorId::from_bytes(bytes);
        assert_eq!(record.as_bytes(), author.as_bytes());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = AuthorId::from_bytes([1u8; ID_LEN]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(ID_LEN)));

        let back: AuthorId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ordering_matches_byte_order() {
        let a = RecordId::from_bytes([0u8; ID_LEN]);
        let b = RecordId::from_bytes([1u8; ID_LEN]);
        assert!(a < b);
    }
}
