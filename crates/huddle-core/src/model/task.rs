use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::{RecordId, SpaceId, UserId};

/// The three progress states of a task.
///
/// Any state may move to any other; there is no terminal state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

impl Status {
    pub const ALL: [Self; 3] = [Self::NotStarted, Self::InProgress, Self::Done];

    const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Optional priority marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A task record as held by the remote store and mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub owner_id: UserId,
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    #[serde(default)]
    pub is_shared: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// `is_shared` only counts for records that live in a space.
    #[must_use]
    pub const fn is_space_shared(&self) -> bool {
        self.is_shared && self.space_id.is_some()
    }

    /// Returns `true` if `self` carries a strictly newer server write than `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.updated_at > other.updated_at
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "not_started" | "todo" | "pending" => Ok(Self::NotStarted),
            "in_progress" | "doing" | "active" => Ok(Self::InProgress),
            "done" | "completed" | "complete" => Ok(Self::Done),
            _ => Err(ParseEnumError {
                expected: "status",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ParseEnumError {
                expected: "priority",
                got: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(shared: bool, space: Option<&str>) -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        TaskRecord {
            id: RecordId::new("t-1"),
            title: "Ship".to_string(),
            description: None,
            status: Status::NotStarted,
            priority: None,
            due_date: None,
            owner_id: UserId::new("alice"),
            space_id: space.map(SpaceId::new),
            is_shared: shared,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn status_json_uses_snake_case() {
        assert_eq!(serde_json::to_string(&Status::InProgress).unwrap(), "\"in_progress\"");
        assert_eq!(
            serde_json::from_str::<Status>("\"not_started\"").unwrap(),
            Status::NotStarted
        );
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
    }

    #[test]
    fn display_parse_roundtrips() {
        for value in Status::ALL {
            assert_eq!(Status::from_str(&value.to_string()).unwrap(), value);
        }
        for value in [Priority::Low, Priority::Medium, Priority::High] {
            assert_eq!(Priority::from_str(&value.to_string()).unwrap(), value);
        }
    }

    #[test]
    fn legacy_status_spellings_map_to_canonical() {
        assert_eq!(Status::from_str("todo").unwrap(), Status::NotStarted);
        assert_eq!(Status::from_str("In Progress").unwrap(), Status::InProgress);
        assert_eq!(Status::from_str("in-progress").unwrap(), Status::InProgress);
        assert_eq!(Status::from_str("completed").unwrap(), Status::Done);
        assert!(Status::from_str("archived").is_err());
        assert!(Priority::from_str("urgent").is_err());
    }

    #[test]
    fn sharing_requires_a_space() {
        assert!(record(true, Some("s1")).is_space_shared());
        assert!(!record(true, None).is_space_shared());
        assert!(!record(false, Some("s1")).is_space_shared());
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let json = r#"{
            "id": "t-9",
            "title": "Write notes",
            "owner_id": "bob",
            "created_at": "2026-03-01T09:00:00Z",
            "updated_at": "2026-03-01T09:00:00Z"
        }"#;
        let rec: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.status, Status::NotStarted);
        assert!(rec.space_id.is_none());
        assert!(!rec.is_shared);
    }
}
