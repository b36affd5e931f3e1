//! Mutation Gateway: optimistic local writes in two phases.
//!
//! `begin_*` validates the request, applies the optimistic change and hands
//! back a [`WriteTicket`]. The caller performs the remote write described
//! by the ticket (after re-targeting it with [`SyncState::prepare`]) and
//! feeds the result to [`SyncState::complete`], which confirms or rolls
//! back. Both phases are synchronous; the remote call in between is the
//! caller's business.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ErrorCode, MutationError, RemoteError};
use crate::model::{NewTask, RecordId, Status, TaskPatch, TaskRecord};
use crate::pending::{Intent, MutationId};
use crate::state::SyncState;

// ---------------------------------------------------------------------------
// Tickets and results
// ---------------------------------------------------------------------------

/// The remote call a pending write must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    Create(NewTask),
    Update(TaskPatch),
    Delete,
}

/// An optimistic write that still has to reach the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub mutation_id: MutationId,
    /// Id the write was issued against; may be provisional.
    pub record_id: RecordId,
    /// Serialization key: writes for one record share a lane.
    pub lane: RecordId,
    pub request: WriteRequest,
    /// Visible status before a status transition, for the completion rule.
    transition_from: Option<Status>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTicket {
    Issue(PendingWrite),
    /// The target is unknown; nothing was applied and nothing must be sent.
    Stale(RecordId),
}

/// Successful remote acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAck {
    Created(TaskRecord),
    Updated(TaskRecord),
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Carries the canonical id assigned by the remote store.
    Created(RecordId),
    Updated(RecordId),
    Deleted(RecordId),
    /// The target no longer exists; treated as success.
    Stale(RecordId),
}

impl MutationOutcome {
    /// [`ErrorCode::StaleTarget`] for a stale success, `None` otherwise.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Stale(_) => Some(ErrorCode::StaleTarget),
            Self::Created(_) | Self::Updated(_) | Self::Deleted(_) => None,
        }
    }
}

/// Emitted once per confirmed transition of a record into `done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionSignal {
    pub record_id: RecordId,
    pub title: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub outcome: MutationOutcome,
    pub completed: Option<CompletionSignal>,
}

impl Resolved {
    const fn plain(outcome: MutationOutcome) -> Self {
        Self {
            outcome,
            completed: None,
        }
    }
}

fn validate_title(title: &str) -> Result<(), MutationError> {
    if title.trim().is_empty() {
        return Err(MutationError::Validation("title must not be empty".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Gateway operations
// ---------------------------------------------------------------------------

impl SyncState {
    /// Insert a provisional record and describe the remote create.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Validation`] for a blank title; nothing is
    /// applied in that case.
    pub fn begin_create(
        &mut self,
        new: NewTask,
        now: DateTime<Utc>,
    ) -> Result<WriteTicket, MutationError> {
        validate_title(&new.title)?;
        let id = self.mint_provisional_id();
        let record = new.to_record(id.clone(), now);
        let mutation_id = self
            .reconciler_mut()
            .record_local(&id, Intent::Create(record), now);
        self.reconciler_mut().issue_write(&id);
        Ok(WriteTicket::Issue(PendingWrite {
            mutation_id,
            lane: id.clone(),
            record_id: id,
            request: WriteRequest::Create(new),
            transition_from: None,
        }))
    }

    /// Apply a partial update optimistically.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Validation`] for an empty patch or a blank
    /// title.
    pub fn begin_update(
        &mut self,
        id: &RecordId,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<WriteTicket, MutationError> {
        if patch.is_empty() {
            return Err(MutationError::Validation("update changes nothing".to_string()));
        }
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        self.begin_patch(id, patch, now, false)
    }

    /// Move a record to `status`.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other `begin_*` calls.
    pub fn begin_transition(
        &mut self,
        id: &RecordId,
        status: Status,
        now: DateTime<Utc>,
    ) -> Result<WriteTicket, MutationError> {
        self.begin_patch(id, TaskPatch::status(status), now, true)
    }

    fn begin_patch(
        &mut self,
        id: &RecordId,
        patch: TaskPatch,
        now: DateTime<Utc>,
        transition: bool,
    ) -> Result<WriteTicket, MutationError> {
        let target = self.store().resolve(id);
        let Some(current) = self.store().get(&target) else {
            tracing::debug!(code = %ErrorCode::StaleTarget, %id, "update of unknown record treated as stale");
            return Ok(WriteTicket::Stale(id.clone()));
        };
        let transition_from = transition.then_some(current.status);
        let lane = self.store().lane_key(&target);
        let mutation_id = self.reconciler_mut().record_local(
            &target,
            Intent::Update(patch.clone()),
            now,
        );
        self.reconciler_mut().issue_write(&lane);
        Ok(WriteTicket::Issue(PendingWrite {
            mutation_id,
            record_id: target,
            lane,
            request: WriteRequest::Update(patch),
            transition_from,
        }))
    }

    /// Hide a record optimistically.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other `begin_*` calls.
    pub fn begin_delete(
        &mut self,
        id: &RecordId,
        now: DateTime<Utc>,
    ) -> Result<WriteTicket, MutationError> {
        let target = self.store().resolve(id);
        if self.store().get(&target).is_none() {
            tracing::debug!(code = %ErrorCode::StaleTarget, %id, "delete of unknown record treated as stale");
            return Ok(WriteTicket::Stale(id.clone()));
        }
        let lane = self.store().lane_key(&target);
        let mutation_id = self
            .reconciler_mut()
            .record_local(&target, Intent::Delete, now);
        self.reconciler_mut().issue_write(&lane);
        Ok(WriteTicket::Issue(PendingWrite {
            mutation_id,
            record_id: target,
            lane,
            request: WriteRequest::Delete,
            transition_from: None,
        }))
    }

    /// Current remote target of a write, or `None` when the write must not
    /// be sent because its mutation was cancelled meanwhile (for example a
    /// failed create took its successors with it).
    #[must_use]
    pub fn prepare(&self, write: &PendingWrite) -> Option<RecordId> {
        if !self.reconciler().is_pending(&write.record_id, write.mutation_id) {
            return None;
        }
        Some(self.store().resolve(&write.record_id))
    }

    /// Resolve a write that was never sent because [`prepare`](Self::prepare)
    /// returned `None`.
    pub fn cancelled(&mut self, write: &PendingWrite) -> MutationOutcome {
        self.reconciler_mut().settle_write(&write.lane);
        tracing::debug!(id = %write.record_id, mutation_id = %write.mutation_id, "write cancelled before send");
        MutationOutcome::Stale(self.store().resolve(&write.record_id))
    }

    /// Fold the remote result of `write` back into the store.
    ///
    /// # Errors
    ///
    /// Network and permission failures are returned after the optimistic
    /// change has been rolled back.
    pub fn complete(
        &mut self,
        write: PendingWrite,
        result: Result<RemoteAck, RemoteError>,
    ) -> Result<Resolved, MutationError> {
        let PendingWrite {
            mutation_id,
            record_id,
            lane,
            request,
            transition_from,
        } = write;

        let resolved =
            self.resolve_write(mutation_id, &record_id, request, transition_from, result);
        self.reconciler_mut().settle_write(&lane);
        resolved
    }

    fn resolve_write(
        &mut self,
        mutation_id: MutationId,
        record_id: &RecordId,
        request: WriteRequest,
        transition_from: Option<Status>,
        result: Result<RemoteAck, RemoteError>,
    ) -> Result<Resolved, MutationError> {
        match (request, result) {
            (WriteRequest::Create(_), Ok(RemoteAck::Created(server))) => {
                let canonical = self
                    .reconciler_mut()
                    .confirm_create(record_id, mutation_id, server);
                tracing::debug!(provisional = %record_id, %canonical, "create confirmed");
                Ok(Resolved::plain(MutationOutcome::Created(canonical)))
            }
            (WriteRequest::Update(patch), Ok(RemoteAck::Updated(server))) => {
                let completed = transition_from
                    .filter(|prior| !prior.is_done())
                    .and(patch.status)
                    .filter(|next| next.is_done())
                    .map(|_| CompletionSignal {
                        record_id: server.id.clone(),
                        title: server.title.clone(),
                        completed_at: server.updated_at,
                    });
                let id = server.id.clone();
                self.reconciler_mut()
                    .confirm_update(record_id, mutation_id, server);
                tracing::debug!(%id, %mutation_id, "update confirmed");
                Ok(Resolved {
                    outcome: MutationOutcome::Updated(id),
                    completed,
                })
            }
            (WriteRequest::Delete, Ok(RemoteAck::Deleted)) => {
                let id = self.store().resolve(record_id);
                self.reconciler_mut().confirm_delete(&id, mutation_id);
                tracing::debug!(%id, "delete confirmed");
                Ok(Resolved::plain(MutationOutcome::Deleted(id)))
            }
            (WriteRequest::Update(_) | WriteRequest::Delete, Err(RemoteError::NotFound(_))) => {
                let id = self.store().resolve(record_id);
                self.reconciler_mut().discard_stale(&id);
                Ok(Resolved::plain(MutationOutcome::Stale(id)))
            }
            (_, Err(err)) => {
                self.reconciler_mut().rollback(record_id, mutation_id);
                tracing::warn!(id = %record_id, %mutation_id, error = %err, "remote write failed");
                Err(MutationError::from_remote(err))
            }
            (request, Ok(ack)) => {
                self.reconciler_mut().rollback(record_id, mutation_id);
                tracing::error!(id = %record_id, ?request, ?ack, "mismatched acknowledgement");
                Err(MutationError::Internal(format!(
                    "unexpected acknowledgement for {record_id}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeEvent;
    use crate::scope::ScopeContext;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn issued(ticket: WriteTicket) -> PendingWrite {
        match ticket {
            WriteTicket::Issue(write) => write,
            WriteTicket::Stale(id) => panic!("unexpected stale ticket for {id}"),
        }
    }

    fn seeded() -> (SyncState, TaskRecord) {
        let mut state = SyncState::default();
        let (handle, _) = state.open_context(&ScopeContext::personal("alice"));
        let record = NewTask::new("Review", "alice").to_record(RecordId::new("srv-1"), t(0));
        state.apply_remote(handle.key(), ChangeEvent::insert(record.clone()));
        (state, record)
    }

    #[test]
    fn blank_title_is_rejected_without_side_effects() {
        let mut state = SyncState::default();
        let err = state.begin_create(NewTask::new("   ", "alice"), t(0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert!(state.store().is_empty());
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn create_is_visible_then_renamed_on_ack() {
        let mut state = SyncState::default();
        let write = issued(state.begin_create(NewTask::new("Plan", "alice"), t(0)).unwrap());
        assert_eq!(write.record_id.as_str(), "local-1");
        assert!(state.record(&write.record_id).is_some());

        let server = NewTask::new("Plan", "alice").to_record(RecordId::new("srv-9"), t(1));
        let resolved = state.complete(write.clone(), Ok(RemoteAck::Created(server))).unwrap();
        assert_eq!(resolved.outcome, MutationOutcome::Created(RecordId::new("srv-9")));
        assert!(state.store().get(&write.record_id).is_none());
        assert_eq!(state.record(&write.record_id).unwrap().id.as_str(), "srv-9");
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn queued_update_of_provisional_targets_canonical_id() {
        let mut state = SyncState::default();
        let create = issued(state.begin_create(NewTask::new("Plan", "alice"), t(0)).unwrap());
        let update = issued(
            state
                .begin_update(&create.record_id, TaskPatch::title("Plan v2"), t(1))
                .unwrap(),
        );
        assert_eq!(update.lane, create.lane);

        let server = NewTask::new("Plan", "alice").to_record(RecordId::new("srv-9"), t(2));
        state.complete(create, Ok(RemoteAck::Created(server))).unwrap();
        assert_eq!(state.prepare(&update), Some(RecordId::new("srv-9")));
        assert_eq!(state.record(&RecordId::new("srv-9")).unwrap().title, "Plan v2");
    }

    #[test]
    fn failed_create_cancels_queued_successors() {
        let mut state = SyncState::default();
        let create = issued(state.begin_create(NewTask::new("Plan", "alice"), t(0)).unwrap());
        let update = issued(
            state
                .begin_transition(&create.record_id, Status::Done, t(1))
                .unwrap(),
        );
        let err = state
            .complete(create, Err(RemoteError::Network("offline".into())))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NetworkFailure);
        assert!(state.store().is_empty());
        assert_eq!(state.prepare(&update), None);
        assert!(matches!(state.cancelled(&update), MutationOutcome::Stale(_)));
    }

    #[test]
    fn completion_signal_only_for_transition_into_done() {
        let (mut state, record) = seeded();
        let write = issued(state.begin_transition(&record.id, Status::Done, t(1)).unwrap());
        let mut server = TaskPatch::status(Status::Done).apply_to(&record);
        server.updated_at = t(2);
        let resolved = state.complete(write, Ok(RemoteAck::Updated(server.clone()))).unwrap();
        let signal = resolved.completed.unwrap();
        assert_eq!(signal.record_id, record.id);
        assert_eq!(signal.completed_at, t(2));

        // Already done: no second signal.
        let again = issued(state.begin_transition(&record.id, Status::Done, t(3)).unwrap());
        server.updated_at = t(4);
        let resolved = state.complete(again, Ok(RemoteAck::Updated(server))).unwrap();
        assert!(resolved.completed.is_none());
    }

    #[test]
    fn plain_update_to_done_emits_no_signal() {
        let (mut state, record) = seeded();
        let write = issued(
            state
                .begin_update(&record.id, TaskPatch::status(Status::Done), t(1))
                .unwrap(),
        );
        let mut server = TaskPatch::status(Status::Done).apply_to(&record);
        server.updated_at = t(2);
        let resolved = state.complete(write, Ok(RemoteAck::Updated(server))).unwrap();
        assert!(resolved.completed.is_none());
    }

    #[test]
    fn failed_transition_restores_prior_status() {
        let (mut state, record) = seeded();
        let write = issued(state.begin_transition(&record.id, Status::Done, t(1)).unwrap());
        assert_eq!(state.record(&record.id).unwrap().status, Status::Done);

        let err = state
            .complete(write, Err(RemoteError::Permission("not owner".into())))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(state.record(&record.id), Some(&record));
    }

    #[test]
    fn unknown_targets_are_stale_successes() {
        let mut state = SyncState::default();
        let ghost = RecordId::new("ghost");
        assert_eq!(
            state.begin_update(&ghost, TaskPatch::title("x"), t(0)).unwrap(),
            WriteTicket::Stale(ghost.clone())
        );
        assert_eq!(state.begin_delete(&ghost, t(0)).unwrap(), WriteTicket::Stale(ghost));
    }

    #[test]
    fn empty_patch_is_a_validation_error() {
        let (mut state, record) = seeded();
        let err = state
            .begin_update(&record.id, TaskPatch::default(), t(1))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        let err = state
            .begin_update(&record.id, TaskPatch::title(" "), t(1))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[test]
    fn not_found_on_update_removes_the_record() {
        let (mut state, record) = seeded();
        let write = issued(
            state
                .begin_update(&record.id, TaskPatch::title("x"), t(1))
                .unwrap(),
        );
        let resolved = state
            .complete(write, Err(RemoteError::NotFound("gone".into())))
            .unwrap();
        assert_eq!(resolved.outcome, MutationOutcome::Stale(record.id.clone()));
        assert!(state.record(&record.id).is_none());
        assert!(state.store().is_tombstoned(&record.id));
    }

    #[test]
    fn delete_hides_immediately_and_tombstones_on_ack() {
        let (mut state, record) = seeded();
        let write = issued(state.begin_delete(&record.id, t(1)).unwrap());
        assert!(state.record(&record.id).is_none());
        let resolved = state.complete(write, Ok(RemoteAck::Deleted)).unwrap();
        assert_eq!(resolved.outcome, MutationOutcome::Deleted(record.id.clone()));
        assert!(state.store().is_tombstoned(&record.id));
    }

    #[test]
    fn alias_is_kept_until_every_write_under_it_resolves() {
        let mut state = SyncState::default();
        let create = issued(state.begin_create(NewTask::new("Plan", "alice"), t(0)).unwrap());
        let delete = issued(state.begin_delete(&create.record_id, t(1)).unwrap());
        assert_eq!(state.store().outstanding_writes(), 2);

        let server = NewTask::new("Plan", "alice").to_record(RecordId::new("srv-9"), t(2));
        state.complete(create, Ok(RemoteAck::Created(server))).unwrap();
        assert_eq!(state.store().alias_count(), 1);
        assert_eq!(state.prepare(&delete), Some(RecordId::new("srv-9")));

        let resolved = state.complete(delete, Ok(RemoteAck::Deleted)).unwrap();
        assert_eq!(resolved.outcome, MutationOutcome::Deleted(RecordId::new("srv-9")));
        assert_eq!(state.store().alias_count(), 0);
        assert_eq!(state.store().outstanding_writes(), 0);
    }

    #[test]
    fn alias_is_released_when_the_record_leaves() {
        let mut state = SyncState::default();
        let (handle, _) = state.open_context(&ScopeContext::personal("alice"));
        let create = issued(state.begin_create(NewTask::new("Plan", "alice"), t(0)).unwrap());
        let provisional = create.record_id.clone();
        let server = NewTask::new("Plan", "alice").to_record(RecordId::new("srv-9"), t(1));
        state
            .complete(create, Ok(RemoteAck::Created(server.clone())))
            .unwrap();
        assert_eq!(state.record(&provisional).map(|r| r.id.as_str()), Some("srv-9"));

        state.apply_remote(handle.key(), ChangeEvent::delete(server));
        assert_eq!(state.store().alias_count(), 0);
        assert!(state.record(&provisional).is_none());
    }

    #[test]
    fn cancelled_write_settles_its_lane() {
        let mut state = SyncState::default();
        let create = issued(state.begin_create(NewTask::new("Plan", "alice"), t(0)).unwrap());
        let update = issued(
            state
                .begin_update(&create.record_id, TaskPatch::title("Plan v2"), t(1))
                .unwrap(),
        );
        state
            .complete(create, Err(RemoteError::Network("offline".into())))
            .unwrap_err();
        assert_eq!(state.store().outstanding_writes(), 1);
        let outcome = state.cancelled(&update);
        assert_eq!(outcome.code(), Some(ErrorCode::StaleTarget));
        assert_eq!(state.store().outstanding_writes(), 0);
    }

    #[test]
    fn failed_delete_restores_the_record() {
        let (mut state, record) = seeded();
        let write = issued(state.begin_delete(&record.id, t(1)).unwrap());
        state
            .complete(write, Err(RemoteError::Network("offline".into())))
            .unwrap_err();
        assert_eq!(state.record(&record.id), Some(&record));
    }
}
