use std::collections::BTreeMap;

use huddle_core::{RecordId, ScopeStats, TaskRecord};

use crate::client::ClientState;
use crate::network::ClientId;

// ── Core result types ─────────────────────────────────────────────────────────

/// Oracle result for an invariant check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        if violations.is_empty() {
            Self::pass()
        } else {
            Self {
                passed: false,
                violations,
            }
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A client's view of its scope differs from the server's answer for
    /// the same scope after everything was delivered.
    ///
    /// Emitted by `check_convergence`.
    Convergence {
        client: ClientId,
        /// On the server, not visible to the client.
        missing: Vec<RecordId>,
        /// Visible to the client, gone from the server.
        extra: Vec<RecordId>,
        /// Present on both sides with different field values.
        differing: Vec<RecordId>,
    },

    /// Local mutations were still pending after the final drain.
    ///
    /// Emitted by `check_settled`.
    Unsettled { client: ClientId, pending: usize },

    /// Cached scope stats disagree with a recount over the store.
    ///
    /// Emitted by `check_stats`.
    Stats {
        client: ClientId,
        cached: Option<ScopeStats>,
        recount: ScopeStats,
    },
}

/// Convergence summary for a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub converged: bool,
    pub divergent_clients: Vec<ClientId>,
    /// Records held by the server at the end of the run.
    pub canonical_record_count: usize,
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Checks client end states against the authoritative records.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    /// Run every check.
    #[must_use]
    pub fn check_all(states: &[ClientState], server: &[TaskRecord]) -> OracleResult {
        Self::check_convergence(states, server)
            .merge(Self::check_settled(states))
            .merge(Self::check_stats(states))
    }

    #[must_use]
    pub fn convergence_report(states: &[ClientState], server: &[TaskRecord]) -> ConvergenceReport {
        let divergent_clients = Self::check_convergence(states, server)
            .violations
            .iter()
            .filter_map(|violation| match violation {
                InvariantViolation::Convergence { client, .. } => Some(*client),
                _ => None,
            })
            .collect::<Vec<_>>();
        ConvergenceReport {
            converged: divergent_clients.is_empty(),
            divergent_clients,
            canonical_record_count: server.len(),
        }
    }

    // ── Convergence ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn check_convergence(states: &[ClientState], server: &[TaskRecord]) -> OracleResult {
        let mut violations = Vec::new();
        for state in states {
            let expected: BTreeMap<&RecordId, &TaskRecord> = server
                .iter()
                .filter(|rec| state.scope.matches(rec))
                .map(|rec| (&rec.id, rec))
                .collect();
            let actual: BTreeMap<&RecordId, &TaskRecord> =
                state.visible.iter().map(|rec| (&rec.id, rec)).collect();

            let missing: Vec<RecordId> = expected
                .keys()
                .filter(|id| !actual.contains_key(*id))
                .map(|id| (*id).clone())
                .collect();
            let extra: Vec<RecordId> = actual
                .keys()
                .filter(|id| !expected.contains_key(*id))
                .map(|id| (*id).clone())
                .collect();
            let differing: Vec<RecordId> = expected
                .iter()
                .filter(|(id, rec)| actual.get(*id).is_some_and(|mine| mine != *rec))
                .map(|(id, _)| (*id).clone())
                .collect();

            if !missing.is_empty() || !extra.is_empty() || !differing.is_empty() {
                violations.push(InvariantViolation::Convergence {
                    client: state.client,
                    missing,
                    extra,
                    differing,
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    // ── Settled ──────────────────────────────────────────────────────────────

    #[must_use]
    pub fn check_settled(states: &[ClientState]) -> OracleResult {
        OracleResult::from_violations(
            states
                .iter()
                .filter(|state| state.pending > 0)
                .map(|state| InvariantViolation::Unsettled {
                    client: state.client,
                    pending: state.pending,
                })
                .collect(),
        )
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn check_stats(states: &[ClientState]) -> OracleResult {
        OracleResult::from_violations(
            states
                .iter()
                .filter(|state| state.cached_stats.as_ref() != Some(&state.recount_stats))
                .map(|state| InvariantViolation::Stats {
                    client: state.client,
                    cached: state.cached_stats.clone(),
                    recount: state.recount_stats.clone(),
                })
                .collect(),
        )
    }
}
