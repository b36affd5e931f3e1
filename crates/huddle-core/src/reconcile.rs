//! Reconciliation of remote events, snapshots and local mutations into the
//! Record Store.
//!
//! The [`Reconciler`] is the only writer of the [`RecordStore`]. Everything
//! that changes a visible record goes through it, and every visible change
//! is forwarded to the [`Aggregator`] before the call returns.
//!
//! # Ordering
//!
//! Remote values are ordered by the server-assigned `updated_at` alone. An
//! insert/update is accepted only for an unknown id or when it is strictly
//! newer than the last server-confirmed value held for that id, so replays,
//! duplicates and reordered deliveries are idempotent. Deleted ids are
//! tombstoned and never resurrected by late events.
//!
//! # Pending mutations
//!
//! A record with local writes in flight keeps its server value as the
//! baseline of a [`PendingChain`](crate::pending::PendingChain) and shows
//! the replay of every pending intent over it. Remote events for such a
//! record are either echoes of the head intent (confirming it) or foreign
//! writes (rebasing the chain). Either way the baseline moves forward and
//! the intents are replayed, so the latest local intent stays visible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::aggregate::Aggregator;
use crate::error::ErrorCode;
use crate::model::{ChangeEvent, ChangeOp, RecordId, TaskRecord};
use crate::pending::{Intent, MutationId, MutationKind, PendingChain, PendingMutation};
use crate::registry::ScopeKey;
use crate::scope::Scope;
use crate::store::{RecordStore, StoreChange};

// ---------------------------------------------------------------------------
// Outcomes and counters
// ---------------------------------------------------------------------------

/// What a single remote event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Accepted as the new value of a record without pending mutations.
    Applied,
    /// Recognised as the echo of a pending local mutation, which is now
    /// confirmed.
    Confirmed(MutationId),
    /// Foreign write under pending mutations; intents replayed over it.
    Rebased,
    /// Record removed by a remote delete.
    Removed,
    /// Not newer than what is already known, or targets a tombstone.
    Stale,
    /// Arrived for a scope that is no longer open.
    Dropped,
}

/// Summary of one bulk resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncSummary {
    /// Records inserted or replaced by the snapshot.
    pub upserted: usize,
    /// Scope records absent from the snapshot that were removed.
    pub removed: usize,
    /// Records with pending mutations whose baseline was refreshed.
    pub rebased: usize,
    /// Snapshot entries ignored because the local value was newer.
    pub ignored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    Applied(ResyncSummary),
    /// The scope closed before the snapshot arrived.
    Dropped,
}

/// Diagnostic counters, monotonically increasing over the engine lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounters {
    pub events_applied: u64,
    pub stale_dropped: u64,
    pub echoes_suppressed: u64,
    pub rebases: u64,
    pub remote_deletes: u64,
    pub resyncs: u64,
    pub rollbacks: u64,
    pub stale_targets: u64,
    pub dead_scope_drops: u64,
    pub evicted: u64,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Reconciler {
    store: RecordStore,
    aggregator: Aggregator,
    counters: ReconcileCounters,
    next_mutation: u64,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn store(&self) -> &RecordStore {
        &self.store
    }

    #[must_use]
    pub const fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    #[must_use]
    pub const fn counters(&self) -> ReconcileCounters {
        self.counters
    }

    /// Split borrow for callers that read the store while updating stats.
    pub(crate) fn parts_mut(&mut self) -> (&RecordStore, &mut Aggregator) {
        (&self.store, &mut self.aggregator)
    }

    pub(crate) const fn note_dead_scope_drop(&mut self) {
        self.counters.dead_scope_drops += 1;
    }

    fn commit(&mut self, change: &StoreChange) {
        self.aggregator.invalidate(change);
    }

    /// Replay the chain of `id` into the visible slot, dropping the chain
    /// once nothing is pending.
    fn refresh(&mut self, id: &RecordId) {
        let Some(chain) = self.store.chain_mut(id) else {
            return;
        };
        let visible = chain.replay();
        if chain.is_empty() {
            self.store.take_chain(id);
        }
        let change = self.store.set_visible(id, visible);
        self.commit(&change);
    }

    // -----------------------------------------------------------------------
    // Remote events
    // -----------------------------------------------------------------------

    /// Fold one remote change notification into the store.
    pub fn apply_remote(&mut self, event: ChangeEvent) -> RemoteOutcome {
        let outcome = match event.op {
            ChangeOp::Delete => self.apply_remote_delete(&event.record.id),
            ChangeOp::Insert | ChangeOp::Update => self.absorb(event.record, true),
        };
        match outcome {
            RemoteOutcome::Applied => self.counters.events_applied += 1,
            RemoteOutcome::Confirmed(_) => self.counters.echoes_suppressed += 1,
            RemoteOutcome::Rebased => self.counters.rebases += 1,
            RemoteOutcome::Removed => self.counters.remote_deletes += 1,
            RemoteOutcome::Stale => self.counters.stale_dropped += 1,
            RemoteOutcome::Dropped => self.counters.dead_scope_drops += 1,
        }
        tracing::debug!(op = %event.op, outcome = ?outcome, "reconciled remote event");
        outcome
    }

    fn apply_remote_delete(&mut self, id: &RecordId) -> RemoteOutcome {
        let id = self.store.resolve(id);
        let known = self.store.contains(&id) || self.store.has_pending(&id);
        self.store.tombstone(&id);
        if !known {
            return RemoteOutcome::Stale;
        }

        let echoed = self.store.take_chain(&id).and_then(|chain| {
            chain
                .head()
                .filter(|head| head.kind == MutationKind::Delete)
                .map(|head| head.mutation_id)
        });
        let change = self.store.remove(&id);
        self.commit(&change);

        let Some(mutation_id) = echoed else {
            return RemoteOutcome::Removed;
        };
        tracing::trace!(%id, %mutation_id, "delete echo confirmed pending delete");
        RemoteOutcome::Confirmed(mutation_id)
    }

    /// Accept a server value for a record under the newest-wins rule.
    ///
    /// With `match_echo` the value may also confirm the head pending
    /// mutation of the record, or an unconfirmed create with the same
    /// content.
    fn absorb(&mut self, incoming: TaskRecord, match_echo: bool) -> RemoteOutcome {
        let id = self.store.resolve(&incoming.id);
        if self.store.is_tombstoned(&id) {
            return RemoteOutcome::Stale;
        }

        let Some(chain) = self.store.chain_mut(&id) else {
            if let Some(existing) = self.store.get(&id) {
                if !incoming.is_newer_than(existing) {
                    return RemoteOutcome::Stale;
                }
            } else if match_echo
                && let Some((provisional, mutation_id)) = self.find_create_echo(&incoming)
            {
                tracing::trace!(%provisional, canonical = %incoming.id, "create echo arrived before ack");
                if let Some(chain) = self.store.chain_mut(&provisional) {
                    chain.remove(mutation_id);
                }
                self.rename(&provisional, incoming);
                return RemoteOutcome::Confirmed(mutation_id);
            }
            let change = self.store.put(incoming);
            self.commit(&change);
            return RemoteOutcome::Applied;
        };

        if chain
            .baseline()
            .is_some_and(|baseline| !incoming.is_newer_than(baseline))
        {
            return RemoteOutcome::Stale;
        }

        let echo = match_echo
            .then(|| chain.head())
            .flatten()
            .filter(|head| match &head.intent {
                Intent::Update(patch) => patch.is_satisfied_by(&incoming),
                Intent::Create(_) | Intent::Delete => false,
            })
            .map(|head| head.mutation_id);

        if let Some(mutation_id) = echo {
            chain.remove(mutation_id);
        }
        chain.set_baseline(Some(incoming));
        self.refresh(&id);

        let Some(mutation_id) = echo else {
            return RemoteOutcome::Rebased;
        };
        tracing::trace!(%id, %mutation_id, "echo confirmed pending update");
        RemoteOutcome::Confirmed(mutation_id)
    }

    /// Earliest unconfirmed create whose fields equal `incoming`.
    fn find_create_echo(&self, incoming: &TaskRecord) -> Option<(RecordId, MutationId)> {
        self.store
            .pending_chains()
            .filter_map(|(id, chain)| {
                let head = chain.head()?;
                match &head.intent {
                    Intent::Create(record) if same_content(record, incoming) => {
                        Some((id.clone(), head.mutation_id))
                    }
                    _ => None,
                }
            })
            .min_by_key(|(_, mutation_id)| *mutation_id)
    }

    /// Move a record from its provisional id to the canonical one in one
    /// step, migrating any still-pending successors.
    fn rename(&mut self, provisional: &RecordId, server: TaskRecord) {
        let canonical = server.id.clone();
        let mut migrated = self
            .store
            .take_chain(provisional)
            .unwrap_or_else(|| PendingChain::new(None));
        let change = self.store.remove(provisional);
        self.commit(&change);
        self.store.alias(provisional, &canonical);

        if self.store.is_tombstoned(&canonical) {
            return;
        }

        migrated.rename(&canonical);
        let mut merged = self.store.take_chain(&canonical).unwrap_or_else(|| {
            PendingChain::new(self.store.get(&canonical).cloned())
        });
        if merged
            .baseline()
            .is_none_or(|baseline| server.is_newer_than(baseline))
        {
            merged.set_baseline(Some(server));
        }
        for mutation in migrated.drain() {
            merged.push(mutation);
        }
        self.store.insert_chain(canonical.clone(), merged);
        self.refresh(&canonical);
        tracing::debug!(%provisional, %canonical, "renamed provisional record");
    }

    // -----------------------------------------------------------------------
    // Snapshots and eviction
    // -----------------------------------------------------------------------

    /// Replace the records attributed to `scope` with an authoritative read.
    pub fn resync(&mut self, scope: &Scope, records: Vec<TaskRecord>) -> ResyncSummary {
        let mut summary = ResyncSummary::default();
        let fresh: HashMap<RecordId, TaskRecord> = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let vanished: Vec<RecordId> = self
            .store
            .iter()
            .filter(|record| {
                scope.matches(record)
                    && !fresh.contains_key(&record.id)
                    && !self.store.has_pending(&record.id)
            })
            .map(|record| record.id.clone())
            .collect();
        for id in &vanished {
            let change = self.store.remove(id);
            self.commit(&change);
            summary.removed += 1;
        }

        // Pending work on a record the server no longer shows here replays
        // over nothing, so a later rollback cannot resurrect the old value.
        let orphaned: Vec<RecordId> = self
            .store
            .pending_chains()
            .filter(|(id, chain)| {
                !fresh.contains_key(*id) && chain.baseline().is_some_and(|b| scope.matches(b))
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &orphaned {
            if let Some(chain) = self.store.chain_mut(id) {
                chain.set_baseline(None);
            }
            self.refresh(id);
            summary.rebased += 1;
        }

        let mut ordered: Vec<TaskRecord> = fresh.into_values().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));
        for record in ordered {
            let id = record.id.clone();
            if self.store.is_tombstoned(&id) {
                summary.ignored += 1;
                continue;
            }
            if let Some(chain) = self.store.chain_mut(&id) {
                if chain
                    .baseline()
                    .is_none_or(|baseline| record.is_newer_than(baseline))
                {
                    chain.set_baseline(Some(record));
                    self.refresh(&id);
                    summary.rebased += 1;
                } else {
                    summary.ignored += 1;
                }
                continue;
            }
            if self
                .store
                .get(&id)
                .is_some_and(|local| local.is_newer_than(&record))
            {
                summary.ignored += 1;
                continue;
            }
            let change = self.store.put(record);
            if !change.is_noop() {
                summary.upserted += 1;
            }
            self.commit(&change);
        }

        self.counters.resyncs += 1;
        tracing::info!(
            %scope,
            upserted = summary.upserted,
            removed = summary.removed,
            rebased = summary.rebased,
            "resynced scope",
        );
        summary
    }

    /// Drop records that only `released` could see. Records with pending
    /// mutations stay until those resolve.
    pub fn evict(&mut self, released: &Scope, still_open: &[Scope]) -> usize {
        let doomed: Vec<RecordId> = self
            .store
            .iter()
            .filter(|record| {
                released.matches(record)
                    && !still_open.iter().any(|scope| scope.matches(record))
                    && !self.store.has_pending(&record.id)
            })
            .map(|record| record.id.clone())
            .collect();
        for id in &doomed {
            let change = self.store.remove(id);
            self.commit(&change);
        }
        self.counters.evicted += doomed.len() as u64;
        doomed.len()
    }

    // -----------------------------------------------------------------------
    // Local mutations
    // -----------------------------------------------------------------------

    /// Record an optimistic intent for `id` and make it visible.
    pub(crate) fn record_local(
        &mut self,
        id: &RecordId,
        intent: Intent,
        issued_at: DateTime<Utc>,
    ) -> MutationId {
        self.next_mutation += 1;
        let mutation_id = MutationId(self.next_mutation);
        let prior_snapshot = self.store.get(id).cloned();
        let kind = intent.kind();
        self.store.chain_or_insert(id).push(PendingMutation {
            mutation_id,
            record_id: id.clone(),
            kind,
            intent,
            prior_snapshot,
            issued_at,
        });
        self.refresh(id);
        tracing::debug!(%id, %mutation_id, ?kind, "applied optimistic mutation");
        mutation_id
    }

    #[must_use]
    pub fn is_pending(&self, id: &RecordId, mutation_id: MutationId) -> bool {
        let id = self.store.resolve(id);
        self.store
            .pending(&id)
            .is_some_and(|chain| chain.position(mutation_id).is_some())
    }

    /// Adopt a successful create. Returns the canonical id.
    pub(crate) fn confirm_create(
        &mut self,
        provisional: &RecordId,
        mutation_id: MutationId,
        server: TaskRecord,
    ) -> RecordId {
        let canonical = server.id.clone();
        let still_pending = self
            .store
            .chain_mut(provisional)
            .and_then(|chain| chain.remove(mutation_id))
            .is_some();

        if !still_pending {
            // Already confirmed by its echo, or rolled back meanwhile.
            self.absorb(server, true);
        } else if &canonical == provisional {
            if let Some(chain) = self.store.chain_mut(provisional) {
                chain.set_baseline(Some(server));
            }
            self.refresh(provisional);
        } else {
            self.rename(provisional, server);
        }
        canonical
    }

    /// Adopt a successful update acknowledgement.
    pub(crate) fn confirm_update(
        &mut self,
        id: &RecordId,
        mutation_id: MutationId,
        server: TaskRecord,
    ) {
        let id = self.store.resolve(id);
        let removed = self
            .store
            .chain_mut(&id)
            .and_then(|chain| chain.remove(mutation_id))
            .is_some();
        let outcome = self.absorb(server, false);
        if removed && outcome == RemoteOutcome::Stale {
            // The ack was not newer than the baseline; the chain still needs
            // replaying without the confirmed intent.
            self.refresh(&id);
        }
    }

    /// Adopt a successful delete acknowledgement.
    pub(crate) fn confirm_delete(&mut self, id: &RecordId, mutation_id: MutationId) {
        let id = self.store.resolve(id);
        self.store.tombstone(&id);
        if let Some(mut chain) = self.store.take_chain(&id) {
            chain.remove(mutation_id);
            if !chain.is_empty() {
                tracing::debug!(%id, left = chain.len(), "dropping intents queued behind a delete");
            }
        }
        let change = self.store.remove(&id);
        self.commit(&change);
    }

    /// Undo a failed mutation. Returns `false` when it was no longer
    /// pending.
    pub(crate) fn rollback(&mut self, id: &RecordId, mutation_id: MutationId) -> bool {
        let id = self.store.resolve(id);
        let Some(chain) = self.store.chain_mut(&id) else {
            return false;
        };
        let Some(position) = chain.position(mutation_id) else {
            return false;
        };

        if chain.mutations()[position].kind == MutationKind::Create {
            // Nothing exists remotely; successors have no target.
            self.store.take_chain(&id);
            let change = self.store.remove(&id);
            self.commit(&change);
        } else {
            chain.remove(mutation_id);
            self.refresh(&id);
        }
        self.counters.rollbacks += 1;
        tracing::warn!(%id, %mutation_id, "rolled back failed mutation");
        true
    }

    /// The remote no longer has `id`: remove and tombstone it locally.
    pub(crate) fn discard_stale(&mut self, id: &RecordId) {
        let id = self.store.resolve(id);
        self.store.tombstone(&id);
        self.store.take_chain(&id);
        let change = self.store.remove(&id);
        self.commit(&change);
        self.counters.stale_targets += 1;
        tracing::debug!(code = %ErrorCode::StaleTarget, %id, "target vanished remotely");
    }

    pub(crate) fn issue_write(&mut self, lane: &RecordId) {
        self.store.issue_write(lane);
    }

    pub(crate) fn settle_write(&mut self, lane: &RecordId) {
        self.store.settle_write(lane);
    }

    // -----------------------------------------------------------------------
    // Bookkeeping bounds
    // -----------------------------------------------------------------------

    /// Record that scope `key` was just activated.
    pub(crate) const fn note_activation(&mut self, key: ScopeKey) {
        self.store.set_epoch(key);
    }

    /// Drop tombstones no live scope can still contradict.
    pub(crate) fn prune_tombstones(&mut self, oldest_live: Option<ScopeKey>) -> usize {
        let pruned = self.store.prune_tombstones(oldest_live);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned tombstones");
        }
        pruned
    }
}

/// True when the user-visible fields of two records agree.
fn same_content(a: &TaskRecord, b: &TaskRecord) -> bool {
    a.title == b.title
        && a.description == b.description
        && a.status == b.status
        && a.priority == b.priority
        && a.due_date == b.due_date
        && a.owner_id == b.owner_id
        && a.space_id == b.space_id
        && a.is_shared == b.is_shared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewTask, Status, TaskPatch};
    use crate::scope::ScopeContext;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn rec(id: &str, title: &str, at: i64) -> TaskRecord {
        let mut record = NewTask::new(title, "alice").to_record(RecordId::new(id), t(0));
        record.updated_at = t(at);
        record
    }

    fn id(raw: &str) -> RecordId {
        RecordId::new(raw)
    }

    #[test]
    fn newest_wins_and_duplicates_are_stale() {
        let mut r = Reconciler::new();
        assert_eq!(r.apply_remote(ChangeEvent::insert(rec("a", "v1", 1))), RemoteOutcome::Applied);
        assert_eq!(r.apply_remote(ChangeEvent::insert(rec("a", "v1", 1))), RemoteOutcome::Stale);
        assert_eq!(r.apply_remote(ChangeEvent::update(rec("a", "v3", 3))), RemoteOutcome::Applied);
        assert_eq!(r.apply_remote(ChangeEvent::update(rec("a", "v2", 2))), RemoteOutcome::Stale);
        assert_eq!(r.store().get(&id("a")).unwrap().title, "v3");
        assert_eq!(r.counters().stale_dropped, 2);
    }

    #[test]
    fn tombstones_block_late_events() {
        let mut r = Reconciler::new();
        r.apply_remote(ChangeEvent::insert(rec("a", "v1", 1)));
        assert_eq!(r.apply_remote(ChangeEvent::delete(rec("a", "v1", 2))), RemoteOutcome::Removed);
        assert_eq!(r.apply_remote(ChangeEvent::update(rec("a", "v5", 5))), RemoteOutcome::Stale);
        assert!(r.store().get(&id("a")).is_none());
    }

    #[test]
    fn delete_for_unknown_id_changes_nothing() {
        let mut r = Reconciler::new();
        assert_eq!(r.apply_remote(ChangeEvent::delete(rec("ghost", "x", 1))), RemoteOutcome::Stale);
        assert!(r.store().is_empty());
    }

    #[test]
    fn update_echo_confirms_without_visible_change() {
        let mut r = Reconciler::new();
        r.apply_remote(ChangeEvent::insert(rec("a", "v1", 1)));
        let patch = TaskPatch::status(Status::Done);
        let m = r.record_local(&id("a"), Intent::Update(patch.clone()), t(2));
        let optimistic = r.store().get(&id("a")).cloned().unwrap();

        let mut echo = patch.apply_to(&rec("a", "v1", 1));
        echo.updated_at = t(3);
        assert_eq!(r.apply_remote(ChangeEvent::update(echo.clone())), RemoteOutcome::Confirmed(m));
        assert!(!r.is_pending(&id("a"), m));
        let visible = r.store().get(&id("a")).unwrap();
        assert_eq!(visible.status, optimistic.status);
        assert_eq!(visible, &echo);

        r.confirm_update(&id("a"), m, echo.clone());
        assert_eq!(r.store().get(&id("a")), Some(&echo));
    }

    #[test]
    fn foreign_write_rebases_and_rollback_restores_it() {
        let mut r = Reconciler::new();
        r.apply_remote(ChangeEvent::insert(rec("a", "v1", 1)));
        let m = r.record_local(&id("a"), Intent::Update(TaskPatch::status(Status::Done)), t(2));

        assert_eq!(r.apply_remote(ChangeEvent::update(rec("a", "foreign", 3))), RemoteOutcome::Rebased);
        let visible = r.store().get(&id("a")).unwrap();
        assert_eq!(visible.title, "foreign");
        assert_eq!(visible.status, Status::Done);

        assert!(r.rollback(&id("a"), m));
        assert_eq!(r.store().get(&id("a")), Some(&rec("a", "foreign", 3)));
        assert!(!r.store().has_pending(&id("a")));
    }

    #[test]
    fn create_echo_before_ack_renames_once() {
        let mut r = Reconciler::new();
        let provisional = id("local-1");
        let draft = NewTask::new("Plan", "alice").to_record(provisional.clone(), t(0));
        let m = r.record_local(&provisional, Intent::Create(draft), t(0));
        let follow = r.record_local(&provisional, Intent::Update(TaskPatch::title("Plan v2")), t(1));

        let server = NewTask::new("Plan", "alice").to_record(id("srv-1"), t(2));
        assert_eq!(r.apply_remote(ChangeEvent::insert(server.clone())), RemoteOutcome::Confirmed(m));
        assert!(r.store().get(&provisional).is_none());
        assert_eq!(r.store().get(&id("srv-1")).unwrap().title, "Plan v2");
        assert!(r.is_pending(&provisional, follow));

        assert_eq!(r.confirm_create(&provisional, m, server), id("srv-1"));
        assert_eq!(r.store().len(), 1);
    }

    #[test]
    fn resync_replaces_scope_but_keeps_pending() {
        let mut r = Reconciler::new();
        let scope = ScopeContext::personal("alice").resolve();
        r.apply_remote(ChangeEvent::insert(rec("gone", "x", 1)));
        r.apply_remote(ChangeEvent::insert(rec("kept", "x", 1)));
        r.record_local(&id("kept"), Intent::Update(TaskPatch::title("mine")), t(2));

        let summary = r.resync(&scope, vec![rec("fresh", "y", 4), rec("kept", "theirs", 5)]);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.upserted, 1);
        assert_eq!(summary.rebased, 1);
        assert!(r.store().get(&id("gone")).is_none());
        assert_eq!(r.store().get(&id("kept")).unwrap().title, "mine");
        assert_eq!(
            r.store().pending(&id("kept")).unwrap().baseline().unwrap().title,
            "theirs"
        );
    }

    #[test]
    fn resync_orphans_pending_work_on_vanished_records() {
        let mut r = Reconciler::new();
        let scope = ScopeContext::personal("alice").resolve();
        r.apply_remote(ChangeEvent::insert(rec("a", "x", 1)));
        let m = r.record_local(&id("a"), Intent::Update(TaskPatch::title("mine")), t(2));

        let summary = r.resync(&scope, Vec::new());
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.rebased, 1);
        assert!(r.store().pending(&id("a")).unwrap().baseline().is_none());

        assert!(r.rollback(&id("a"), m));
        assert!(r.store().get(&id("a")).is_none());
    }

    #[test]
    fn resync_is_idempotent() {
        let mut r = Reconciler::new();
        let scope = ScopeContext::personal("alice").resolve();
        let snapshot = vec![rec("a", "x", 1), rec("b", "y", 2)];
        r.resync(&scope, snapshot.clone());
        let before: Vec<TaskRecord> = r.store().iter().cloned().collect();
        let summary = r.resync(&scope, snapshot);
        assert_eq!(summary.upserted, 0);
        assert_eq!(r.store().iter().cloned().collect::<Vec<_>>(), before);
    }

    #[test]
    fn failed_create_drops_successors() {
        let mut r = Reconciler::new();
        let provisional = id("local-1");
        let draft = NewTask::new("Plan", "alice").to_record(provisional.clone(), t(0));
        let m = r.record_local(&provisional, Intent::Create(draft), t(0));
        let follow = r.record_local(&provisional, Intent::Update(TaskPatch::title("v2")), t(1));

        assert!(r.rollback(&provisional, m));
        assert!(r.store().is_empty());
        assert!(!r.is_pending(&provisional, follow));
        assert!(!r.rollback(&provisional, follow));
    }

    #[test]
    fn eviction_spares_records_other_scopes_still_see() {
        let mut r = Reconciler::new();
        let mine = ScopeContext::personal("alice").resolve();
        let team = ScopeContext::personal("bob").watching(["alice"]).resolve();
        r.apply_remote(ChangeEvent::insert(rec("a", "x", 1)));

        assert_eq!(r.evict(&mine, std::slice::from_ref(&team)), 0);
        assert_eq!(r.evict(&mine, &[]), 1);
        assert!(r.store().is_empty());
    }

    #[test]
    fn stale_target_is_tombstoned() {
        let mut r = Reconciler::new();
        r.apply_remote(ChangeEvent::insert(rec("a", "x", 1)));
        r.record_local(&id("a"), Intent::Update(TaskPatch::title("y")), t(2));
        r.discard_stale(&id("a"));
        assert!(r.store().is_tombstoned(&id("a")));
        assert!(!r.store().has_pending(&id("a")));
        assert_eq!(r.apply_remote(ChangeEvent::insert(rec("a", "x", 9))), RemoteOutcome::Stale);
    }
}
