//! [`SyncState`]: the whole synchronous engine behind one `&mut self`.
//!
//! Composes the scope registry, the reconciler (which owns the store and
//! the aggregator) and the provisional id mint. An async driver holds it
//! behind a lock and calls into it between suspension points; every method
//! runs to completion, so observers only ever see reconciled states.

use chrono::{DateTime, Utc};

use crate::aggregate::{Aggregator, ScopeStats};
use crate::config::EngineConfig;
use crate::model::{ChangeEvent, RecordId, TaskRecord};
use crate::reconcile::{ReconcileCounters, Reconciler, RemoteOutcome, ResyncOutcome};
use crate::registry::{Activation, Closure, ScopeKey, ScopeRegistry, SubscriptionHandle};
use crate::scope::{Scope, ScopeContext};
use crate::store::RecordStore;
use crate::view::{self, ListPage, Page, ViewFilter};

#[derive(Debug, Default)]
pub struct SyncState {
    config: EngineConfig,
    registry: ScopeRegistry,
    reconciler: Reconciler,
    next_provisional: u64,
}

impl SyncState {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &RecordStore {
        self.reconciler.store()
    }

    #[must_use]
    pub const fn counters(&self) -> ReconcileCounters {
        self.reconciler.counters()
    }

    #[must_use]
    pub const fn registry(&self) -> &ScopeRegistry {
        &self.registry
    }

    pub(crate) const fn reconciler_mut(&mut self) -> &mut Reconciler {
        &mut self.reconciler
    }

    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub(crate) fn mint_provisional_id(&mut self) -> RecordId {
        self.next_provisional += 1;
        RecordId::new(format!(
            "{}{}",
            self.config.ids.provisional_prefix, self.next_provisional
        ))
    }

    // -----------------------------------------------------------------------
    // Scope lifecycle
    // -----------------------------------------------------------------------

    pub fn open_context(&mut self, ctx: &ScopeContext) -> (SubscriptionHandle, Activation) {
        self.open(ctx.resolve())
    }

    /// Register a consumer of `scope`. A [`Activation::Started`] result
    /// means the caller must start a feed for the returned key.
    pub fn open(&mut self, scope: Scope) -> (SubscriptionHandle, Activation) {
        let (handle, activation) = self.registry.open(scope);
        match &activation {
            Activation::Started { key, scope } => {
                self.reconciler.note_activation(*key);
                let (store, aggregator) = self.reconciler.parts_mut();
                aggregator.track(*key, scope.clone(), store);
                tracing::info!(%key, %scope, "opened scope");
            }
            Activation::Shared { key, consumers } => {
                tracing::debug!(%key, consumers, "joined open scope");
            }
        }
        (handle, activation)
    }

    /// Release one consumer. When the last one leaves, the scope stops
    /// accepting events and records only it could see are evicted.
    /// Tombstones older than every remaining scope are pruned.
    pub fn close(&mut self, handle: &SubscriptionHandle) -> Closure {
        let closure = self.registry.close(handle);
        if let Closure::Released { key, scope } = &closure {
            let (_, aggregator) = self.reconciler.parts_mut();
            aggregator.untrack(*key);
            let still_open: Vec<Scope> = self.registry.scopes().map(|(_, s)| s.clone()).collect();
            let evicted = self.reconciler.evict(scope, &still_open);
            let oldest_live = self.registry.scopes().map(|(key, _)| key).min();
            let pruned = self.reconciler.prune_tombstones(oldest_live);
            tracing::info!(%key, %scope, evicted, pruned, "closed scope");
        }
        closure
    }

    #[must_use]
    pub fn is_live(&self, key: ScopeKey) -> bool {
        self.registry.is_live(key)
    }

    // -----------------------------------------------------------------------
    // Remote input
    // -----------------------------------------------------------------------

    /// Apply an incremental notification delivered for scope `key`.
    pub fn apply_remote(&mut self, key: ScopeKey, event: ChangeEvent) -> RemoteOutcome {
        if !self.registry.is_live(key) {
            self.reconciler.note_dead_scope_drop();
            tracing::debug!(%key, id = %event.record.id, "dropped event for closed scope");
            return RemoteOutcome::Dropped;
        }
        self.reconciler.apply_remote(event)
    }

    /// Apply an authoritative snapshot read for scope `key`.
    pub fn resync(&mut self, key: ScopeKey, records: Vec<TaskRecord>) -> ResyncOutcome {
        let Some(scope) = self.registry.scope(key).cloned() else {
            self.reconciler.note_dead_scope_drop();
            tracing::warn!(%key, records = records.len(), "discarded snapshot for closed scope");
            return ResyncOutcome::Dropped;
        };
        ResyncOutcome::Applied(self.reconciler.resync(&scope, records))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Visible record for `id`, following provisional aliases.
    #[must_use]
    pub fn record(&self, id: &RecordId) -> Option<&TaskRecord> {
        let store = self.reconciler.store();
        store.get(&store.resolve(id))
    }

    #[must_use]
    pub fn list(
        &self,
        scope: &Scope,
        filter: &ViewFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> ListPage {
        view::list(
            self.reconciler.store().iter(),
            scope,
            filter,
            page,
            now,
            &self.config.view,
        )
    }

    /// Cached stats of an open scope.
    pub fn stats(&mut self, key: ScopeKey) -> Option<ScopeStats> {
        let (store, aggregator) = self.reconciler.parts_mut();
        aggregator.stats(key, store)
    }

    /// Stats of any scope: cached when it is open, a full scan otherwise.
    pub fn stats_for(&mut self, scope: &Scope) -> ScopeStats {
        if let Some(key) = self.registry.key_for(scope)
            && let Some(stats) = self.stats(key)
        {
            return stats;
        }
        Aggregator::stats_for(scope, self.reconciler.store())
    }

    /// Outstanding local mutations across all records.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.reconciler.store().pending_count()
    }
}
