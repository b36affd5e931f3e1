//! Pending (optimistic, unconfirmed) mutations.
//!
//! Each record with outstanding local writes owns a [`PendingChain`]: the
//! last server-confirmed value (the *baseline*) plus the ordered list of
//! local intents layered on top of it. The visible value is always the
//! replay of every intent over the baseline, and each intent's
//! `prior_snapshot` is the replay of the intents before it, so resolving
//! one intent never disturbs the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{RecordId, TaskPatch, TaskRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(pub u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// What the local user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Insert the provisional record.
    Create(TaskRecord),
    Update(TaskPatch),
    Delete,
}

impl Intent {
    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::Create(_) => MutationKind::Create,
            Self::Update(_) => MutationKind::Update,
            Self::Delete => MutationKind::Delete,
        }
    }

    fn apply(&self, current: Option<TaskRecord>) -> Option<TaskRecord> {
        match self {
            Self::Create(record) => Some(record.clone()),
            Self::Update(patch) => current.map(|record| patch.apply_to(&record)),
            Self::Delete => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub mutation_id: MutationId,
    pub record_id: RecordId,
    pub kind: MutationKind,
    pub intent: Intent,
    /// Store value immediately before this intent; the rollback target.
    pub prior_snapshot: Option<TaskRecord>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChain {
    baseline: Option<TaskRecord>,
    mutations: Vec<PendingMutation>,
}

impl PendingChain {
    #[must_use]
    pub const fn new(baseline: Option<TaskRecord>) -> Self {
        Self {
            baseline,
            mutations: Vec::new(),
        }
    }

    /// Last value confirmed by the remote store, if any.
    #[must_use]
    pub const fn baseline(&self) -> Option<&TaskRecord> {
        self.baseline.as_ref()
    }

    pub(crate) fn set_baseline(&mut self, baseline: Option<TaskRecord>) {
        self.baseline = baseline;
    }

    #[must_use]
    pub fn mutations(&self) -> &[PendingMutation] {
        &self.mutations
    }

    #[must_use]
    pub fn head(&self) -> Option<&PendingMutation> {
        self.mutations.first()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&PendingMutation> {
        self.mutations.last()
    }

    #[must_use]
    pub fn position(&self, mutation_id: MutationId) -> Option<usize> {
        self.mutations
            .iter()
            .position(|m| m.mutation_id == mutation_id)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.mutations.len()
    }

    pub(crate) fn push(&mut self, mutation: PendingMutation) {
        self.mutations.push(mutation);
    }

    pub(crate) fn remove(&mut self, mutation_id: MutationId) -> Option<PendingMutation> {
        let index = self.position(mutation_id)?;
        Some(self.mutations.remove(index))
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingMutation> {
        std::mem::take(&mut self.mutations)
    }

    pub(crate) fn rename(&mut self, id: &RecordId) {
        for mutation in &mut self.mutations {
            mutation.record_id = id.clone();
            if let Intent::Create(record) = &mut mutation.intent {
                record.id = id.clone();
            }
        }
    }

    /// Recompute every prior snapshot from the baseline and return the
    /// resulting visible value.
    pub(crate) fn replay(&mut self) -> Option<TaskRecord> {
        let mut current = self.baseline.clone();
        for mutation in &mut self.mutations {
            mutation.prior_snapshot.clone_from(&current);
            current = mutation.intent.apply(current);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewTask, Status};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap()
    }

    fn base() -> TaskRecord {
        NewTask::new("Plan", "alice").to_record(RecordId::new("t-1"), at())
    }

    fn update(id: u64, patch: TaskPatch) -> PendingMutation {
        PendingMutation {
            mutation_id: MutationId(id),
            record_id: RecordId::new("t-1"),
            kind: MutationKind::Update,
            intent: Intent::Update(patch),
            prior_snapshot: None,
            issued_at: at(),
        }
    }

    #[test]
    fn replay_layers_intents_in_order() {
        let mut chain = PendingChain::new(Some(base()));
        chain.push(update(1, TaskPatch::status(Status::InProgress)));
        chain.push(update(2, TaskPatch::title("Plan v2")));

        let visible = chain.replay().unwrap();
        assert_eq!(visible.status, Status::InProgress);
        assert_eq!(visible.title, "Plan v2");

        let second_prior = chain.mutations()[1].prior_snapshot.clone().unwrap();
        assert_eq!(second_prior.status, Status::InProgress);
        assert_eq!(second_prior.title, "Plan");
    }

    #[test]
    fn removing_a_middle_intent_hands_its_prior_to_the_successor() {
        let mut chain = PendingChain::new(Some(base()));
        chain.push(update(1, TaskPatch::status(Status::Done)));
        chain.push(update(2, TaskPatch::title("Plan v2")));
        chain.replay();

        chain.remove(MutationId(1));
        let visible = chain.replay().unwrap();
        assert_eq!(visible.status, Status::NotStarted);
        assert_eq!(visible.title, "Plan v2");
        assert_eq!(chain.head().unwrap().prior_snapshot, Some(base()));
    }

    #[test]
    fn delete_hides_and_updates_over_nothing_stay_hidden() {
        let mut chain = PendingChain::new(None);
        chain.push(update(1, TaskPatch::status(Status::Done)));
        assert!(chain.replay().is_none());

        let mut chain = PendingChain::new(Some(base()));
        chain.push(PendingMutation {
            intent: Intent::Delete,
            kind: MutationKind::Delete,
            ..update(1, TaskPatch::default())
        });
        assert!(chain.replay().is_none());
        assert_eq!(chain.head().unwrap().prior_snapshot, Some(base()));
    }
}
