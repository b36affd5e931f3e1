use serde::{Deserialize, Serialize};

use huddle_core::ChangeEvent;

use crate::rng::DeterministicRng;

/// Index of a simulated client.
pub type ClientId = usize;

/// Fault injection configuration for simulated change feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of notifications delivered twice.
    pub duplicate_rate_percent: u8,
    /// Percentage chance of reversing the ready batch at each tick.
    pub reorder_rate_percent: u8,
    /// Percentage chance per round that a random client's feed dies.
    pub disconnect_rate_percent: u8,
    /// Rounds a dead feed stays down before the client resubscribes.
    pub reconnect_after_rounds: u8,
    /// Maximum rounds a remote write stays in flight.
    pub max_write_latency_rounds: u8,
    /// Percentage of remote writes that fail with a network error.
    pub write_failure_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            duplicate_rate_percent: 5,
            reorder_rate_percent: 10,
            disconnect_rate_percent: 3,
            reconnect_after_rounds: 2,
            max_write_latency_rounds: 2,
            write_failure_percent: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingDelivery {
    deliver_at_round: u64,
    to: ClientId,
    event: ChangeEvent,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub duplicated: bool,
    pub delay_rounds: u8,
}

/// Result of delivering all ready notifications for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome {
    pub delivered: Vec<(ClientId, ChangeEvent)>,
    pub reordered: bool,
}

/// Deterministic fault-injecting change-feed transport.
///
/// Notifications are never dropped while a feed is up; a disconnect loses
/// everything still queued for that client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedNetwork {
    pending: Vec<PendingDelivery>,
    fault: FaultConfig,
}

impl FeedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue `event` for client `to`.
    pub fn send(
        &mut self,
        to: ClientId,
        event: ChangeEvent,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        let delay_bound = u64::from(self.fault.max_delay_rounds).saturating_add(1);
        let delay = u8::try_from(rng.next_bounded(delay_bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay));

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            let extra = rng.next_bounded(delay_bound);
            self.pending.push(PendingDelivery {
                deliver_at_round: deliver_at_round.saturating_add(extra),
                to,
                event: event.clone(),
            });
        }
        self.pending.push(PendingDelivery {
            deliver_at_round,
            to,
            event,
        });

        SendOutcome {
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Deliver everything due by `round`.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (ready, future): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|pending| pending.deliver_at_round <= round);
        self.pending = future;

        let mut delivered: Vec<(ClientId, ChangeEvent)> =
            ready.into_iter().map(|p| (p.to, p.event)).collect();
        let reordered =
            delivered.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            delivered.reverse();
        }

        DeliverOutcome {
            delivered,
            reordered,
        }
    }

    /// Drop every queued notification for `client`. Returns how many were
    /// lost.
    pub fn disconnect(&mut self, client: ClientId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|pending| pending.to != client);
        before - self.pending.len()
    }
}
