//! Write payloads: the create field set and the partial update patch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::{Priority, RecordId, SpaceId, Status, TaskRecord, UserId};

/// Fields supplied when creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
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
}

impl NewTask {
    /// Minimal create payload: a title and an owner, everything else defaulted.
    pub fn new(title: impl Into<String>, owner_id: impl Into<UserId>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: Status::NotStarted,
            priority: None,
            due_date: None,
            owner_id: owner_id.into(),
            space_id: None,
            is_shared: false,
        }
    }

    #[must_use]
    pub fn in_space(mut self, space_id: impl Into<SpaceId>, shared: bool) -> Self {
        self.space_id = Some(space_id.into());
        self.is_shared = shared;
        self
    }

    #[must_use]
    pub const fn due(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Materialize the payload as a record with the given id and timestamps.
    #[must_use]
    pub fn to_record(&self, id: RecordId, at: DateTime<Utc>) -> TaskRecord {
        TaskRecord {
            id,
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            priority: self.priority,
            due_date: self.due_date,
            owner_id: self.owner_id.clone(),
            space_id: self.space_id.clone(),
            is_shared: self.is_shared,
            created_at: at,
            updated_at: at,
        }
    }

    /// True when `record` carries exactly the user-supplied fields of this payload.
    #[must_use]
    pub fn is_satisfied_by(&self, record: &TaskRecord) -> bool {
        self.title == record.title
            && self.description == record.description
            && self.status == record.status
            && self.priority == record.priority
            && self.due_date == record.due_date
            && self.owner_id == record.owner_id
            && self.space_id == record.space_id
            && self.is_shared == record.is_shared
    }
}

#[allow(clippy::option_option)] // outer None: field absent; Some(None): explicit null
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial update. `None` leaves a field untouched; for nullable fields
/// `Some(None)` clears the value.
#[allow(clippy::option_option)] // Some(None) clears a nullable field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Option<Priority>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub space_id: Option<Option<SpaceId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_shared: Option<bool>,
}

impl TaskPatch {
    #[must_use]
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// True if the patch can move a record between scopes.
    #[must_use]
    pub const fn touches_visibility(&self) -> bool {
        self.space_id.is_some() || self.is_shared.is_some()
    }

    /// Apply the patch on top of `base`. Server timestamps are preserved.
    #[must_use]
    pub fn apply_to(&self, base: &TaskRecord) -> TaskRecord {
        let mut next = base.clone();
        if let Some(title) = &self.title {
            next.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            next.description.clone_from(description);
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(priority) = self.priority {
            next.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            next.due_date = due_date;
        }
        if let Some(space_id) = &self.space_id {
            next.space_id.clone_from(space_id);
        }
        if let Some(is_shared) = self.is_shared {
            next.is_shared = is_shared;
        }
        next
    }

    /// True when every field this patch sets already holds the patched value.
    #[must_use]
    pub fn is_satisfied_by(&self, record: &TaskRecord) -> bool {
        self.title.as_ref().is_none_or(|v| v == &record.title)
            && self
                .description
                .as_ref()
                .is_none_or(|v| v == &record.description)
            && self.status.is_none_or(|v| v == record.status)
            && self.priority.is_none_or(|v| v == record.priority)
            && self.due_date.is_none_or(|v| v == record.due_date)
            && self.space_id.as_ref().is_none_or(|v| v == &record.space_id)
            && self.is_shared.is_none_or(|v| v == record.is_shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        NewTask::new("Draft agenda", "alice")
            .in_space("design", true)
            .to_record(RecordId::new("t-1"), at)
    }

    #[test]
    fn apply_preserves_untouched_fields_and_timestamps() {
        let rec = base();
        let patch = TaskPatch {
            status: Some(Status::InProgress),
            description: Some(Some("bring slides".to_string())),
            ..TaskPatch::default()
        };
        let next = patch.apply_to(&rec);
        assert_eq!(next.status, Status::InProgress);
        assert_eq!(next.description.as_deref(), Some("bring slides"));
        assert_eq!(next.title, rec.title);
        assert_eq!(next.updated_at, rec.updated_at);
    }

    #[test]
    fn nullable_fields_can_be_cleared() {
        let rec = base();
        let patch = TaskPatch {
            space_id: Some(None),
            ..TaskPatch::default()
        };
        let next = patch.apply_to(&rec);
        assert!(next.space_id.is_none());
        assert!(patch.touches_visibility());
    }

    #[test]
    fn satisfied_only_when_every_patched_field_matches() {
        let rec = base();
        let patch = TaskPatch::status(Status::Done);
        assert!(!patch.is_satisfied_by(&rec));
        assert!(patch.is_satisfied_by(&patch.apply_to(&rec)));
        assert!(TaskPatch::default().is_satisfied_by(&rec));
    }

    #[test]
    fn json_distinguishes_missing_from_null() {
        let patch: TaskPatch = serde_json::from_str(r#"{"due_date": null}"#).unwrap();
        assert_eq!(patch.due_date, Some(None));
        assert!(patch.description.is_none());

        let empty: TaskPatch = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn new_task_matches_its_own_record() {
        let task = NewTask::new("Review", "bob");
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        let rec = task.to_record(RecordId::new("srv-1"), at);
        assert!(task.is_satisfied_by(&rec));
        let mut other = rec;
        other.title = "Review again".to_string();
        assert!(!task.is_satisfied_by(&other));
    }
}
