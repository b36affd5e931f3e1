//! The Record Store: canonical local cache of task records.
//!
//! Holds the visible value of every known record, the pending-mutation
//! chain of records with outstanding local writes, tombstones for deleted
//! ids, and the provisional → canonical id aliases produced by confirmed
//! creates. Only the reconciler writes to it; every write returns a
//! [`StoreChange`] describing the visible before/after values so derived
//! views can be invalidated precisely.
//!
//! Aliases live while their record is visible or any write issued under
//! the provisional id is unresolved. Tombstones are stamped with the
//! newest scope activation at the time of the delete and pruned once every
//! live scope was opened after it.

use std::collections::{BTreeMap, HashMap};

use crate::model::{RecordId, TaskRecord};
use crate::pending::PendingChain;
use crate::registry::ScopeKey;

/// Visible effect of one store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub before: Option<TaskRecord>,
    pub after: Option<TaskRecord>,
}

impl StoreChange {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecordStore {
    records: BTreeMap<RecordId, TaskRecord>,
    pending: HashMap<RecordId, PendingChain>,
    tombstones: HashMap<RecordId, Option<ScopeKey>>,
    aliases: HashMap<RecordId, RecordId>,
    lanes: HashMap<RecordId, RecordId>,
    /// Issued, unresolved writes per lane key.
    outstanding: HashMap<RecordId, usize>,
    epoch: Option<ScopeKey>,
}

impl RecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&TaskRecord> {
        self.records.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    /// Visible records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
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

    #[must_use]
    pub fn pending(&self, id: &RecordId) -> Option<&PendingChain> {
        self.pending.get(id)
    }

    #[must_use]
    pub fn has_pending(&self, id: &RecordId) -> bool {
        self.pending.contains_key(id)
    }

    /// Total outstanding local mutations across all records.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(PendingChain::len).sum()
    }

    pub fn pending_chains(&self) -> impl Iterator<Item = (&RecordId, &PendingChain)> {
        self.pending.iter()
    }

    #[must_use]
    pub fn is_tombstoned(&self, id: &RecordId) -> bool {
        self.tombstones.contains_key(id)
    }

    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Writes issued and not yet resolved, across all lanes.
    #[must_use]
    pub fn outstanding_writes(&self) -> usize {
        self.outstanding.values().sum()
    }

    /// Follow a provisional id to its canonical id (identity otherwise).
    #[must_use]
    pub fn resolve(&self, id: &RecordId) -> RecordId {
        self.aliases.get(id).unwrap_or(id).clone()
    }

    /// Stable key under which writes for a record are serialized. A renamed
    /// record keeps the lane of its provisional id.
    #[must_use]
    pub fn lane_key(&self, id: &RecordId) -> RecordId {
        let canonical = self.resolve(id);
        self.lanes.get(&canonical).unwrap_or(&canonical).clone()
    }

    /// The last server-confirmed value for `id`.
    #[must_use]
    pub fn server_version(&self, id: &RecordId) -> Option<&TaskRecord> {
        self.pending
            .get(id)
            .map_or_else(|| self.records.get(id), PendingChain::baseline)
    }

    pub(crate) fn set_visible(&mut self, id: &RecordId, value: Option<TaskRecord>) -> StoreChange {
        let Some(record) = value else {
            let before = self.records.remove(id);
            self.release_alias(id);
            return StoreChange {
                before,
                after: None,
            };
        };
        StoreChange {
            before: self.records.insert(id.clone(), record.clone()),
            after: Some(record),
        }
    }

    pub(crate) fn put(&mut self, record: TaskRecord) -> StoreChange {
        let id = record.id.clone();
        self.set_visible(&id, Some(record))
    }

    pub(crate) fn remove(&mut self, id: &RecordId) -> StoreChange {
        self.set_visible(id, None)
    }

    pub(crate) fn chain_mut(&mut self, id: &RecordId) -> Option<&mut PendingChain> {
        self.pending.get_mut(id)
    }

    pub(crate) fn chain_or_insert(&mut self, id: &RecordId) -> &mut PendingChain {
        self.pending
            .entry(id.clone())
            .or_insert_with(|| PendingChain::new(self.records.get(id).cloned()))
    }

    pub(crate) fn insert_chain(&mut self, id: RecordId, chain: PendingChain) {
        self.pending.insert(id, chain);
    }

    pub(crate) fn take_chain(&mut self, id: &RecordId) -> Option<PendingChain> {
        self.pending.remove(id)
    }

    pub(crate) fn tombstone(&mut self, id: &RecordId) {
        self.tombstones.insert(id.clone(), self.epoch);
    }

    /// Note the newest scope activation.
    pub(crate) const fn set_epoch(&mut self, key: ScopeKey) {
        self.epoch = Some(key);
    }

    /// Drop tombstones written before `oldest_live` was opened, or every
    /// tombstone when no scope is open. Nothing is pruned while a write is
    /// unresolved.
    pub(crate) fn prune_tombstones(&mut self, oldest_live: Option<ScopeKey>) -> usize {
        if !self.outstanding.is_empty() {
            return 0;
        }
        let before = self.tombstones.len();
        self.tombstones
            .retain(|_, stamp| oldest_live.is_some_and(|oldest| *stamp >= Some(oldest)));
        before - self.tombstones.len()
    }

    pub(crate) fn issue_write(&mut self, lane: &RecordId) {
        *self.outstanding.entry(lane.clone()).or_default() += 1;
    }

    /// Resolve one write issued on `lane`.
    pub(crate) fn settle_write(&mut self, lane: &RecordId) {
        let Some(count) = self.outstanding.get_mut(lane) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.outstanding.remove(lane);
            let canonical = self.resolve(lane);
            self.release_alias(&canonical);
        }
    }

    /// Forget the provisional alias of `canonical` once nothing can still
    /// address the record through it.
    fn release_alias(&mut self, canonical: &RecordId) {
        let Some(lane) = self.lanes.get(canonical) else {
            return;
        };
        if self.records.contains_key(canonical)
            || self.pending.contains_key(canonical)
            || self.outstanding.contains_key(lane)
        {
            return;
        }
        if let Some(lane) = self.lanes.remove(canonical) {
            self.aliases.remove(&lane);
        }
    }

    pub(crate) fn alias(&mut self, provisional: &RecordId, canonical: &RecordId) {
        let lane = self.lane_key(provisional);
        self.aliases.insert(provisional.clone(), canonical.clone());
        self.lanes.insert(canonical.clone(), lane);
    }
}
