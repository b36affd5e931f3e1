//! Incrementally maintained per-scope statistics.
//!
//! Every tracked scope keeps the set of record ids attributed to it. Store
//! changes update that membership immediately and mark the scope dirty; the
//! counts themselves are recomputed from the membership lazily, on the next
//! read. Untracked scopes are answered with a full scan.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::{RecordId, Status, TaskRecord};
use crate::registry::ScopeKey;
use crate::scope::Scope;
use crate::store::{RecordStore, StoreChange};

/// Counts over the records of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStats {
    pub total: usize,
    /// Always carries all three statuses, zero-filled.
    pub by_status: BTreeMap<Status, usize>,
    pub shared_count: usize,
}

impl Default for ScopeStats {
    fn default() -> Self {
        Self {
            total: 0,
            by_status: Status::ALL.iter().map(|s| (*s, 0)).collect(),
            shared_count: 0,
        }
    }
}

impl ScopeStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.add(record);
        }
        stats
    }

    fn add(&mut self, record: &TaskRecord) {
        self.total += 1;
        *self.by_status.entry(record.status).or_insert(0) += 1;
        if record.is_space_shared() {
            self.shared_count += 1;
        }
    }

    #[must_use]
    pub fn count(&self, status: Status) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct Tracked {
    scope: Scope,
    members: BTreeSet<RecordId>,
    cached: ScopeStats,
    dirty: bool,
}

#[derive(Debug, Default)]
pub struct Aggregator {
    scopes: HashMap<ScopeKey, Tracked>,
    recomputes: u64,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `scope`, seeding membership from the current store.
    pub fn track(&mut self, key: ScopeKey, scope: Scope, store: &RecordStore) {
        let members = store
            .iter()
            .filter(|record| scope.matches(record))
            .map(|record| record.id.clone())
            .collect();
        self.scopes.insert(
            key,
            Tracked {
                scope,
                members,
                cached: ScopeStats::default(),
                dirty: true,
            },
        );
    }

    pub fn untrack(&mut self, key: ScopeKey) {
        self.scopes.remove(&key);
    }

    #[must_use]
    pub fn is_tracked(&self, key: ScopeKey) -> bool {
        self.scopes.contains_key(&key)
    }

    #[must_use]
    pub fn is_dirty(&self, key: ScopeKey) -> bool {
        self.scopes.get(&key).is_some_and(|t| t.dirty)
    }

    #[must_use]
    pub fn members(&self, key: ScopeKey) -> Option<&BTreeSet<RecordId>> {
        self.scopes.get(&key).map(|t| &t.members)
    }

    /// Number of lazy recomputations performed so far.
    #[must_use]
    pub const fn recomputes(&self) -> u64 {
        self.recomputes
    }

    /// Fold one store change into every tracked scope it touches.
    pub fn invalidate(&mut self, change: &StoreChange) {
        if change.is_noop() {
            return;
        }
        for tracked in self.scopes.values_mut() {
            let before = change
                .before
                .as_ref()
                .filter(|record| tracked.scope.matches(record));
            let after = change
                .after
                .as_ref()
                .filter(|record| tracked.scope.matches(record));
            if before.is_none() && after.is_none() {
                continue;
            }
            if let Some(record) = before {
                tracked.members.remove(&record.id);
            }
            if let Some(record) = after {
                tracked.members.insert(record.id.clone());
            }
            tracked.dirty = true;
        }
    }

    /// Stats for a tracked scope, recomputed only if something changed.
    pub fn stats(&mut self, key: ScopeKey, store: &RecordStore) -> Option<ScopeStats> {
        let tracked = self.scopes.get_mut(&key)?;
        if tracked.dirty {
            tracked.cached =
                ScopeStats::from_records(tracked.members.iter().filter_map(|id| store.get(id)));
            tracked.dirty = false;
            self.recomputes += 1;
            tracing::trace!(%key, total = tracked.cached.total, "recomputed scope stats");
        }
        Some(tracked.cached.clone())
    }

    /// Stats for any scope computed from a full scan, without caching.
    #[must_use]
    pub fn stats_for(scope: &Scope, store: &RecordStore) -> ScopeStats {
        ScopeStats::from_records(store.iter().filter(|record| scope.matches(record)))
    }
}
