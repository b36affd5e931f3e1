//! In-memory authoritative store.
//!
//! Assigns canonical ids and server timestamps. Timestamps are strictly
//! increasing across the whole store, so every write to a record carries a
//! newer `updated_at` than the one before it.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use huddle_core::{
    ChangeEvent, NewTask, RecordId, RemoteError, ScopeFilter, TaskPatch, TaskRecord,
};

#[derive(Debug, Clone, Default)]
pub struct SimServer {
    records: BTreeMap<RecordId, TaskRecord>,
    next_id: u64,
    last_stamp: Option<DateTime<Utc>>,
}

impl SimServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    /// Place a record as-is, bypassing id and timestamp assignment.
    pub fn seed(&mut self, record: TaskRecord) {
        if self.last_stamp.is_none_or(|last| record.updated_at > last) {
            self.last_stamp = Some(record.updated_at);
        }
        self.records.insert(record.id.clone(), record);
    }

    pub fn create(&mut self, new: &NewTask, now: DateTime<Utc>) -> ChangeEvent {
        self.next_id += 1;
        let id = RecordId::new(format!("srv-{}", self.next_id));
        let stamp = self.stamp(now);
        let record = new.to_record(id.clone(), stamp);
        self.records.insert(id, record.clone());
        ChangeEvent::insert(record)
    }

    /// Apply `patch` and return the update event with its before-image.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] when `id` does not exist.
    pub fn update(
        &mut self,
        id: &RecordId,
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<(TaskRecord, ChangeEvent), RemoteError> {
        let stamp = self.stamp(now);
        let Some(current) = self.records.get_mut(id) else {
            return Err(RemoteError::NotFound(id.to_string()));
        };
        let before = current.clone();
        let mut next = patch.apply_to(current);
        next.updated_at = stamp;
        *current = next.clone();
        Ok((before, ChangeEvent::update(next)))
    }

    /// Remove `id`; the event carries the last value stamped with the
    /// deletion time.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] when `id` does not exist.
    pub fn delete(&mut self, id: &RecordId, now: DateTime<Utc>) -> Result<ChangeEvent, RemoteError> {
        let stamp = self.stamp(now);
        let Some(mut gone) = self.records.remove(id) else {
            return Err(RemoteError::NotFound(id.to_string()));
        };
        gone.updated_at = stamp;
        Ok(ChangeEvent::delete(gone))
    }

    #[must_use]
    pub fn read(&self, filter: &ScopeFilter) -> Vec<TaskRecord> {
        self.records
            .values()
            .filter(|rec| filter.matches(rec))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&TaskRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use huddle_core::{ChangeOp, ScopeContext, Status};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn stamps_strictly_increase_even_when_the_clock_stalls() {
        let mut server = SimServer::new();
        let created = server.create(&NewTask::new("a", "alice"), now());
        let (_, first) = server
            .update(&created.record.id, &TaskPatch::title("b"), now())
            .unwrap();
        let (_, second) = server
            .update(&created.record.id, &TaskPatch::status(Status::Done), now())
            .unwrap();
        assert!(first.record.updated_at > created.record.updated_at);
        assert!(second.record.updated_at > first.record.updated_at);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut server = SimServer::new();
        let a = server.create(&NewTask::new("a", "alice"), now());
        server.delete(&a.record.id, now()).unwrap();
        let b = server.create(&NewTask::new("b", "alice"), now());
        assert_ne!(a.record.id, b.record.id);
    }

    #[test]
    fn writes_to_missing_records_are_not_found() {
        let mut server = SimServer::new();
        let ghost = RecordId::new("srv-404");
        assert!(matches!(
            server.update(&ghost, &TaskPatch::title("x"), now()),
            Err(RemoteError::NotFound(_))
        ));
        assert!(matches!(server.delete(&ghost, now()), Err(RemoteError::NotFound(_))));
    }

    #[test]
    fn read_filters_by_scope() {
        let mut server = SimServer::new();
        server.create(&NewTask::new("mine", "alice"), now());
        server.create(&NewTask::new("theirs", "bob"), now());
        let scope = ScopeContext::personal("alice").resolve();
        let titles: Vec<String> = server.read(&scope).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, ["mine"]);
    }

    #[test]
    fn delete_event_is_stamped_later_than_the_record() {
        let mut server = SimServer::new();
        let created = server.create(&NewTask::new("a", "alice"), now());
        let event = server.delete(&created.record.id, now()).unwrap();
        assert_eq!(event.op, ChangeOp::Delete);
        assert!(event.record.updated_at > created.record.updated_at);
        assert!(server.is_empty());
    }
}
