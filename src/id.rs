//! Stable identifiers for trains and interlock entities.
//!
//! Identifiers are operator-facing names such as `"P1"` or `"S1"`, so they
//! wrap a `String` rather than a UUID. Each kind gets its own newtype so a
//! signal id can never be passed where a track id is expected.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty or whitespace.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&$name> for $name {
            fn from(id: &$name) -> Self {
                id.clone()
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_id!(
    /// Identifier of a train, owned by the external simulation layer.
    TrainId
);

string_id!(
    /// Identifier of a platform track (e.g. `"P1"`).
    TrackId
);

string_id!(
    /// Identifier of a signal (e.g. `"S1"`).
    SignalId
);

string_id!(
    /// Identifier of a level-crossing gate (e.g. `"G1"`).
    GateId
);

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_id_display_and_compare() {
        let id = TrackId::from("P1");
        assert_eq!(id.to_string(), "P1");
        assert_eq!(id, "P1");
        assert!(!id.is_blank());
        assert!(TrainId::new("  ").is_blank());
    }

    #[test]
    fn test_id_borrow_lookup() {
        let mut map = BTreeMap::new();
        map.insert(SignalId::from("S1"), 1);
        assert_eq!(map.get("S1"), Some(&1));
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&GateId::from("G1")).unwrap();
        assert_eq!(json, "\"G1\"");
    }
}
