pub mod change;
pub mod patch;
pub mod task;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use change::{ChangeEvent, ChangeOp};
pub use patch::{NewTask, TaskPatch};
pub use task::{ParseEnumError, Priority, Status, TaskRecord};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier without validation.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(
    /// Opaque, immutable task record identifier.
    ///
    /// Either canonical (assigned by the remote store) or provisional
    /// (minted locally for an optimistic create).
    RecordId
);

string_id!(
    /// Identity of a workspace member.
    UserId
);

string_id!(
    /// Identity of a shared workspace ("space").
    SpaceId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_transparently() {
        let id = RecordId::new("task-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"task-7\"");
        let back: RecordId = serde_json::from_str("\"task-7\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn blank_ids_are_empty() {
        assert!(UserId::new("  ").is_empty());
        assert!(!UserId::new("alice").is_empty());
    }
}
