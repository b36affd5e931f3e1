use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use huddle_core::aggregate::Aggregator;
use huddle_core::{
    ChangeEvent, CompletionSignal, MutationError, PendingWrite, RemoteAck, RemoteError,
    RemoteOutcome, Resolved, ResyncOutcome, Scope, ScopeContext, ScopeStats, SubscriptionHandle,
    SyncState, TaskRecord,
};

use crate::clock::SimulatedClock;
use crate::network::ClientId;

/// A write that has left the client and waits for the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub write: PendingWrite,
    pub due_round: u64,
}

/// Final observable state of one client, as checked by the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub client: ClientId,
    pub scope: Scope,
    /// Visible records attributed to the scope, sorted by id.
    pub visible: Vec<TaskRecord>,
    pub pending: usize,
    pub cached_stats: Option<ScopeStats>,
    pub recount_stats: ScopeStats,
    pub completions: usize,
}

/// One simulated device: its own engine core, one open scope and a queue
/// of writes in flight. Writes leave strictly in issue order.
#[derive(Debug)]
pub struct SimClient {
    id: ClientId,
    context: ScopeContext,
    scope: Scope,
    state: SyncState,
    handle: SubscriptionHandle,
    clock: SimulatedClock,
    in_flight: VecDeque<InFlight>,
    down_until: Option<u64>,
    completions: Vec<CompletionSignal>,
}

impl SimClient {
    #[must_use]
    pub fn new(id: ClientId, context: ScopeContext, clock: SimulatedClock) -> Self {
        let mut state = SyncState::default();
        let scope = context.resolve();
        let (handle, _) = state.open(scope.clone());
        Self {
            id,
            context,
            scope,
            state,
            handle,
            clock,
            in_flight: VecDeque::new(),
            down_until: None,
            completions: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    #[must_use]
    pub const fn context(&self) -> &ScopeContext {
        &self.context
    }

    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub const fn state(&self) -> &SyncState {
        &self.state
    }

    pub const fn state_mut(&mut self) -> &mut SyncState {
        &mut self.state
    }

    #[must_use]
    pub fn now(&self, round: u64) -> DateTime<Utc> {
        self.clock.now(round)
    }

    // -----------------------------------------------------------------------
    // Feed
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.down_until.is_none()
    }

    pub const fn disconnect(&mut self, until_round: u64) {
        self.down_until = Some(until_round);
    }

    /// Whether the feed is down and due back by `round`.
    #[must_use]
    pub fn reconnect_due(&self, round: u64) -> bool {
        self.down_until.is_some_and(|until| until <= round)
    }

    /// Come back online with a fresh snapshot.
    pub fn reconnect(&mut self, snapshot: Vec<TaskRecord>) -> ResyncOutcome {
        self.down_until = None;
        self.state.resync(self.handle.key(), snapshot)
    }

    pub fn receive(&mut self, event: ChangeEvent) -> RemoteOutcome {
        self.state.apply_remote(self.handle.key(), event)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub fn enqueue(&mut self, write: PendingWrite, due_round: u64) {
        self.in_flight.push_back(InFlight { write, due_round });
    }

    /// Oldest in-flight write if it is due by `round`.
    pub fn next_due(&mut self, round: u64) -> Option<PendingWrite> {
        if self.in_flight.front()?.due_round > round {
            return None;
        }
        self.in_flight.pop_front().map(|flight| flight.write)
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn complete(
        &mut self,
        write: PendingWrite,
        result: Result<RemoteAck, RemoteError>,
    ) -> Result<Resolved, MutationError> {
        let resolved = self.state.complete(write, result)?;
        if let Some(signal) = &resolved.completed {
            self.completions.push(signal.clone());
        }
        Ok(resolved)
    }

    #[must_use]
    pub fn completions(&self) -> &[CompletionSignal] {
        &self.completions
    }

    /// Visible records attributed to the client's scope.
    #[must_use]
    pub fn visible(&self) -> Vec<TaskRecord> {
        self.state
            .store()
            .iter()
            .filter(|rec| self.scope.matches(rec))
            .cloned()
            .collect()
    }

    pub fn snapshot(&mut self) -> ClientState {
        let cached_stats = self.state.stats(self.handle.key());
        ClientState {
            client: self.id,
            scope: self.scope.clone(),
            visible: self.visible(),
            pending: self.state.pending_count(),
            cached_stats,
            recount_stats: Aggregator::stats_for(&self.scope, self.state.store()),
            completions: self.completions.len(),
        }
    }
}
