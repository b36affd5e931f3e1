//! Round-based multi-client simulation against one authoritative server.
//!
//! Every round each client may issue a local mutation, due writes reach the
//! server (or fail), dead feeds come back with a resync, and due change
//! notifications are delivered. After the last round everything in flight
//! is drained so the oracle can compare each client with the server.

use anyhow::{Result, bail};
use huddle_core::{
    ChangeEvent, ChangeOp, NewTask, PendingWrite, RecordId, RemoteAck, RemoteError, RemoteOutcome,
    ResyncOutcome, ResyncSummary, ScopeContext, Status, TaskPatch, TaskRecord, WriteRequest,
    WriteTicket,
};
use serde::{Deserialize, Serialize};

use crate::client::{ClientState, SimClient};
use crate::clock::{ClockConfig, SimulatedClock};
use crate::network::{ClientId, FaultConfig, FeedNetwork};
use crate::oracle::{ConvergenceOracle, ConvergenceReport};
use crate::rng::DeterministicRng;
use crate::server::SimServer;

pub const OWNERS: [&str; 3] = ["ana", "ben", "cai"];
pub const SPACE: &str = "studio";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub client_count: usize,
    pub rounds: u64,
    /// Percent chance per round that a client issues a mutation.
    pub op_rate_percent: u8,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            client_count: 4,
            rounds: 40,
            op_rate_percent: 60,
            fault: FaultConfig::default(),
            clock: ClockConfig::default(),
        }
    }
}

/// One traced step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEventKind {
    Issue {
        client: ClientId,
        id: RecordId,
        request: &'static str,
    },
    StaleTicket {
        client: ClientId,
        id: RecordId,
    },
    Cancelled {
        client: ClientId,
        id: RecordId,
    },
    Acked {
        client: ClientId,
        id: RecordId,
        completed: bool,
    },
    Failed {
        client: ClientId,
        id: RecordId,
        error: String,
    },
    Deliver {
        client: ClientId,
        id: RecordId,
        op: ChangeOp,
        outcome: RemoteOutcome,
    },
    Disconnect {
        client: ClientId,
        lost: usize,
    },
    Resync {
        client: ClientId,
        summary: Option<ResyncSummary>,
    },
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    pub convergence: ConvergenceReport,
    /// At least one disconnect, one failed or cancelled write and one
    /// duplicate or reordered delivery happened in the same run.
    pub interesting_state_reached: bool,
    pub states: Vec<ClientState>,
    pub server: Vec<TaskRecord>,
}

/// Scope of client `index`: a team view, a personal view or a shared
/// space view, rotating.
#[must_use]
pub fn context_for(index: usize) -> ScopeContext {
    let user = OWNERS[index % OWNERS.len()];
    match index % 3 {
        0 => ScopeContext::personal(user).watching(OWNERS),
        1 => ScopeContext::personal(user),
        _ => ScopeContext::personal(user).in_space(SPACE).shared(),
    }
}

#[derive(Debug, Default)]
struct FaultTally {
    disconnects: usize,
    unhappy_writes: usize,
    scrambled_deliveries: usize,
}

#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    server: SimServer,
    server_clock: SimulatedClock,
    network: FeedNetwork,
    clients: Vec<SimClient>,
    trace: Vec<TraceEvent>,
    tally: FaultTally,
    next_title: u64,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error for a config with no clients or no rounds.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.client_count == 0 {
            bail!("client_count must be > 0");
        }
        if config.rounds == 0 {
            bail!("rounds must be > 0");
        }
        let mut rng = DeterministicRng::new(config.seed);
        let clients = (0..config.client_count)
            .map(|index| SimClient::new(index, context_for(index), config.clock.client(&mut rng)))
            .collect();
        Ok(Self {
            config,
            rng,
            server: SimServer::new(),
            server_clock: config.clock.server(),
            network: FeedNetwork::new(config.fault),
            clients,
            trace: Vec::new(),
            tally: FaultTally::default(),
            next_title: 0,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run every round, drain, and snapshot the clients.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for parity with campaign runners.
    pub fn run(&mut self) -> Result<SimulationResult> {
        for round in 0..self.config.rounds {
            self.step(round);
        }
        self.drain(self.config.rounds);

        let states: Vec<ClientState> = self.clients.iter_mut().map(SimClient::snapshot).collect();
        let server: Vec<TaskRecord> = self.server.records().cloned().collect();
        let convergence = ConvergenceOracle::convergence_report(&states, &server);
        tracing::debug!(
            seed = self.config.seed,
            trace = self.trace.len(),
            converged = convergence.converged,
            "simulation finished"
        );

        Ok(SimulationResult {
            trace: std::mem::take(&mut self.trace),
            convergence,
            interesting_state_reached: self.tally.disconnects > 0
                && self.tally.unhappy_writes > 0
                && self.tally.scrambled_deliveries > 0,
            states,
            server,
        })
    }

    fn step(&mut self, round: u64) {
        for client in 0..self.clients.len() {
            if self.rng.hit_rate_percent(self.config.op_rate_percent) {
                self.issue(client, round);
            }
        }
        for client in 0..self.clients.len() {
            while let Some(write) = self.clients[client].next_due(round) {
                self.send(client, write, round, true);
            }
        }
        if self.rng.hit_rate_percent(self.config.fault.disconnect_rate_percent) {
            let client = self.rng.index(self.clients.len());
            if self.clients[client].is_connected() {
                let lost = self.network.disconnect(client);
                let back = round + u64::from(self.config.fault.reconnect_after_rounds).max(1);
                self.clients[client].disconnect(back);
                self.tally.disconnects += 1;
                self.trace(round, TraceEventKind::Disconnect { client, lost });
            }
        }
        for client in 0..self.clients.len() {
            if self.clients[client].reconnect_due(round) {
                self.reconnect(client, round);
            }
        }
        self.deliver(round);
    }

    fn drain(&mut self, round: u64) {
        for client in 0..self.clients.len() {
            if !self.clients[client].is_connected() {
                self.reconnect(client, round);
            }
        }
        loop {
            let mut busy = false;
            for client in 0..self.clients.len() {
                while let Some(write) = self.clients[client].next_due(u64::MAX) {
                    busy = true;
                    self.send(client, write, round, false);
                }
            }
            if self.network.pending_len() > 0 {
                busy = true;
                self.deliver(u64::MAX);
            }
            if !busy {
                break;
            }
        }
    }

    fn trace(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }

    // -----------------------------------------------------------------------
    // Local mutations
    // -----------------------------------------------------------------------

    fn fresh_title(&mut self) -> String {
        self.next_title += 1;
        format!("task {}", self.next_title)
    }

    fn issue(&mut self, client: ClientId, round: u64) {
        let visible: Vec<RecordId> = self.clients[client]
            .visible()
            .into_iter()
            .map(|rec| rec.id)
            .collect();
        let target = self.rng.pick(&visible).cloned();
        let roll = self.rng.next_bounded(100);
        let now = self.clients[client].now(round);

        let ticket = match target {
            Some(id) if roll < 30 => {
                let patch = self.random_patch();
                self.clients[client].state_mut().begin_update(&id, patch, now)
            }
            Some(id) if roll < 55 => {
                let status = *self.rng.pick(&Status::ALL).unwrap_or(&Status::Done);
                self.clients[client]
                    .state_mut()
                    .begin_transition(&id, status, now)
            }
            Some(id) if roll < 70 => self.clients[client].state_mut().begin_delete(&id, now),
            _ => {
                let new = self.random_task(client);
                self.clients[client].state_mut().begin_create(new, now)
            }
        };

        match ticket {
            Ok(WriteTicket::Stale(id)) => {
                self.trace(round, TraceEventKind::StaleTicket { client, id });
            }
            Ok(WriteTicket::Issue(write)) => {
                let id = write.record_id.clone();
                let request = request_name(&write.request);
                let latency = self
                    .rng
                    .next_bounded(u64::from(self.config.fault.max_write_latency_rounds) + 1);
                self.clients[client].enqueue(write, round + latency);
                self.trace(round, TraceEventKind::Issue { client, id, request });
            }
            Err(err) => {
                tracing::debug!(client, error = %err, "rejected local mutation");
            }
        }
    }

    fn random_task(&mut self, client: ClientId) -> NewTask {
        let title = self.fresh_title();
        let owner = self.clients[client].context().user_id.clone();
        let new = NewTask::new(title, owner);
        if self.rng.hit_rate_percent(50) {
            let shared = self.rng.hit_rate_percent(70);
            new.in_space(SPACE, shared)
        } else {
            new
        }
    }

    fn random_patch(&mut self) -> TaskPatch {
        match self.rng.next_bounded(4) {
            0 => TaskPatch::title(self.fresh_title()),
            1 => TaskPatch {
                is_shared: Some(self.rng.hit_rate_percent(50)),
                ..TaskPatch::default()
            },
            2 => TaskPatch {
                space_id: Some(self.rng.hit_rate_percent(50).then(|| SPACE.into())),
                ..TaskPatch::default()
            },
            _ => TaskPatch {
                title: Some(self.fresh_title()),
                status: self.rng.pick(&Status::ALL).copied(),
                ..TaskPatch::default()
            },
        }
    }

    // -----------------------------------------------------------------------
    // Remote side
    // -----------------------------------------------------------------------

    /// Perform one write against the server and resolve it on the client.
    fn send(&mut self, client: ClientId, write: PendingWrite, round: u64, faulty: bool) {
        let id = write.record_id.clone();
        let Some(target) = self.clients[client].state().prepare(&write) else {
            let _ = self.clients[client].state_mut().cancelled(&write);
            self.tally.unhappy_writes += 1;
            self.trace(round, TraceEventKind::Cancelled { client, id });
            return;
        };

        let result = if faulty && self.rng.hit_rate_percent(self.config.fault.write_failure_percent)
        {
            Err(RemoteError::Network("injected failure".to_string()))
        } else {
            self.apply_to_server(&write.request, &target, round)
        };

        match self.clients[client].complete(write, result) {
            Ok(resolved) => {
                let completed = resolved.completed.is_some();
                self.trace(round, TraceEventKind::Acked { client, id, completed });
            }
            Err(err) => {
                self.tally.unhappy_writes += 1;
                self.trace(
                    round,
                    TraceEventKind::Failed {
                        client,
                        id,
                        error: err.to_string(),
                    },
                );
            }
        }
    }

    fn apply_to_server(
        &mut self,
        request: &WriteRequest,
        target: &RecordId,
        round: u64,
    ) -> Result<RemoteAck, RemoteError> {
        let now = self.server_clock.now(round);
        match request {
            WriteRequest::Create(new) => {
                let event = self.server.create(new, now);
                let ack = RemoteAck::Created(event.record.clone());
                self.fan_out(&event, None, round);
                Ok(ack)
            }
            WriteRequest::Update(patch) => {
                let (before, event) = self.server.update(target, patch, now)?;
                let ack = RemoteAck::Updated(event.record.clone());
                self.fan_out(&event, Some(&before), round);
                Ok(ack)
            }
            WriteRequest::Delete => {
                let event = self.server.delete(target, now)?;
                self.fan_out(&event, None, round);
                Ok(RemoteAck::Deleted)
            }
        }
    }

    /// Notify every connected client whose scope sees the record before or
    /// after the change.
    fn fan_out(&mut self, event: &ChangeEvent, before: Option<&TaskRecord>, round: u64) {
        for client in 0..self.clients.len() {
            let sub = &self.clients[client];
            if !sub.is_connected() {
                continue;
            }
            let sees = sub.scope().matches(&event.record)
                || before.is_some_and(|rec| sub.scope().matches(rec));
            if sees {
                let outcome = self.network.send(client, event.clone(), round, &mut self.rng);
                if outcome.duplicated {
                    self.tally.scrambled_deliveries += 1;
                }
            }
        }
    }

    fn reconnect(&mut self, client: ClientId, round: u64) {
        let snapshot = self.server.read(self.clients[client].scope());
        let summary = match self.clients[client].reconnect(snapshot) {
            ResyncOutcome::Applied(summary) => Some(summary),
            ResyncOutcome::Dropped => None,
        };
        self.trace(round, TraceEventKind::Resync { client, summary });
    }

    fn deliver(&mut self, round: u64) {
        let ready = self.network.deliver_ready(round, &mut self.rng);
        if ready.reordered {
            self.tally.scrambled_deliveries += 1;
        }
        for (client, event) in ready.delivered {
            let id = event.record.id.clone();
            let op = event.op;
            let outcome = self.clients[client].receive(event);
            self.trace(
                round,
                TraceEventKind::Deliver {
                    client,
                    id,
                    op,
                    outcome,
                },
            );
        }
    }
}

const fn request_name(request: &WriteRequest) -> &'static str {
    match request {
        WriteRequest::Create(_) => "create",
        WriteRequest::Update(_) => "update",
        WriteRequest::Delete => "delete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            fault: FaultConfig {
                max_delay_rounds: 0,
                duplicate_rate_percent: 0,
                reorder_rate_percent: 0,
                disconnect_rate_percent: 0,
                reconnect_after_rounds: 1,
                max_write_latency_rounds: 0,
                write_failure_percent: 0,
            },
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn rejects_empty_configs() {
        assert!(Simulator::new(SimulationConfig {
            client_count: 0,
            ..SimulationConfig::default()
        })
        .is_err());
        assert!(Simulator::new(SimulationConfig {
            rounds: 0,
            ..SimulationConfig::default()
        })
        .is_err());
    }

    #[test]
    fn same_seed_same_trace() {
        let a = Simulator::new(SimulationConfig::default()).unwrap().run().unwrap();
        let b = Simulator::new(SimulationConfig::default()).unwrap().run().unwrap();
        assert_eq!(a.trace, b.trace);
        assert_eq!(a.server, b.server);
    }

    #[test]
    fn fault_free_run_converges() {
        let result = Simulator::new(calm(9)).unwrap().run().unwrap();
        assert!(result.convergence.converged, "{:?}", result.convergence);
        assert!(!result.server.is_empty());
        assert!(!result.interesting_state_reached);
    }

    #[test]
    fn contexts_rotate_through_view_kinds() {
        assert_eq!(context_for(0).watched_owner_ids.len(), OWNERS.len());
        assert!(context_for(1).watched_owner_ids.is_empty());
        assert!(context_for(2).space_id.is_some());
    }
}
