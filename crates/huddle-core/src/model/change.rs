use serde::{Deserialize, Serialize};
use std::fmt;

use super::TaskRecord;

/// Kind of change carried by a remote feed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// One notification from the remote change feed.
///
/// For deletes, `record` is the last value the remote held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub record: TaskRecord,
}

impl ChangeEvent {
    #[must_use]
    pub const fn insert(record: TaskRecord) -> Self {
        Self {
            op: ChangeOp::Insert,
            record,
        }
    }

    #[must_use]
    pub const fn update(record: TaskRecord) -> Self {
        Self {
            op: ChangeOp::Update,
            record,
        }
    }

    #[must_use]
    pub const fn delete(record: TaskRecord) -> Self {
        Self {
            op: ChangeOp::Delete,
            record,
        }
    }
}
