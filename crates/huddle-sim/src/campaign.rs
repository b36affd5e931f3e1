//! Many-seed runs of the simulator sharing one set of fault parameters.
//!
//! A failing seed is reported with its violations and can be replayed
//! alone with [`replay_seed`].

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::network::FaultConfig;
use crate::oracle::{ConvergenceOracle, InvariantViolation, OracleResult};
use crate::simulator::{SimulationConfig, SimulationResult, Simulator, TraceEventKind};

/// Campaign-level configuration: which seeds to run and the simulation
/// parameters shared by every seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub client_count: usize,
    pub rounds: u64,
    pub op_rate_percent: u8,
    pub fault_max_delay: u8,
    pub fault_duplicate_percent: u8,
    pub fault_reorder_percent: u8,
    pub fault_disconnect_percent: u8,
    pub fault_reconnect_after: u8,
    pub fault_write_latency: u8,
    pub fault_write_failure_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            client_count: 4,
            rounds: 40,
            op_rate_percent: 60,
            fault_max_delay: 3,
            fault_duplicate_percent: 10,
            fault_reorder_percent: 15,
            fault_disconnect_percent: 5,
            fault_reconnect_after: 2,
            fault_write_latency: 2,
            fault_write_failure_percent: 10,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            client_count: self.client_count,
            rounds: self.rounds,
            op_rate_percent: self.op_rate_percent,
            fault: FaultConfig {
                max_delay_rounds: self.fault_max_delay,
                duplicate_rate_percent: self.fault_duplicate_percent,
                reorder_rate_percent: self.fault_reorder_percent,
                disconnect_rate_percent: self.fault_disconnect_percent,
                reconnect_after_rounds: self.fault_reconnect_after,
                max_write_latency_rounds: self.fault_write_latency,
                write_failure_percent: self.fault_write_failure_percent,
            },
            clock: crate::clock::ClockConfig::default(),
        }
    }

    /// # Errors
    ///
    /// Returns an error naming the first out-of-range parameter.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.client_count == 0 {
            bail!("client_count must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        let percents = [
            ("op_rate_percent", self.op_rate_percent),
            ("fault_duplicate_percent", self.fault_duplicate_percent),
            ("fault_reorder_percent", self.fault_reorder_percent),
            ("fault_disconnect_percent", self.fault_disconnect_percent),
            ("fault_write_failure_percent", self.fault_write_failure_percent),
        ];
        if let Some((name, value)) = percents.iter().find(|(_, value)| *value > 100) {
            bail!("{name} must be <= 100, got {value}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// Lowest failing seed; replay this one first.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that hit a disconnect, a failed write and a scrambled delivery.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
    /// Records created on the server during the run.
    pub created: usize,
}

/// Run every seed in `config.seed_range` and collect the failures.
///
/// # Errors
///
/// Returns an error for an invalid config or a simulation that could not
/// be built.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };
    for seed in config.seed_range.clone() {
        let (result, oracle) = run_checked(seed, config)?;
        report.seeds_run += 1;
        report.interesting_states_reached += usize::from(result.interesting_state_reached);
        if oracle.passed {
            report.seeds_passed += 1;
            continue;
        }
        tracing::warn!(seed, violations = oracle.violations.len(), "seed diverged");
        report.first_failure.get_or_insert(seed);
        report.failures.push(SeedFailure {
            seed,
            violations: oracle.violations.iter().map(format_violation).collect(),
        });
    }
    Ok(report)
}

/// Run one seed. The inner `Err` carries the violated invariants.
///
/// # Errors
///
/// Returns an error when the simulation could not be built.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let (_, oracle) = run_checked(seed, config)?;
    if oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(oracle.violations))
    }
}

/// Re-run `seed` keeping its full trace.
///
/// # Errors
///
/// Returns an error for an invalid config or a simulation that could not
/// be built.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let (result, oracle) = run_checked(seed, config)?;
    let created = count_creates(&result);
    Ok(DetailedTrace {
        result,
        oracle,
        created,
    })
}

fn run_checked(seed: u64, config: &CampaignConfig) -> Result<(SimulationResult, OracleResult)> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = ConvergenceOracle::check_all(&result.states, &result.server);
    Ok((result, oracle))
}

fn count_creates(result: &SimulationResult) -> usize {
    result
        .trace
        .iter()
        .filter(|te| {
            matches!(
                te.kind,
                TraceEventKind::Issue {
                    request: "create",
                    ..
                }
            )
        })
        .count()
}

/// One-line description of a violation for reports.
#[must_use]
pub fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::Convergence {
            client,
            missing,
            extra,
            differing,
        } => {
            format!(
                "Convergence: client {client} diverges from the server \
                 (missing={missing:?}, extra={extra:?}, differing={differing:?})"
            )
        }
        InvariantViolation::Unsettled { client, pending } => {
            format!("Unsettled: client {client} still has {pending} pending mutation(s)")
        }
        InvariantViolation::Stats {
            client,
            cached,
            recount,
        } => {
            format!("Stats: client {client} cached {cached:?} but recount is {recount:?}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_config_default_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn campaign_config_empty_seed_range_rejected() {
        let config = CampaignConfig {
            seed_range: 5..5,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn campaign_config_zero_clients_rejected() {
        let config = CampaignConfig {
            client_count: 0,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn campaign_config_percent_over_100_rejected() {
        let config = CampaignConfig {
            fault_reorder_percent: 101,
            ..CampaignConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("fault_reorder_percent"), "{err}");
    }

    #[test]
    fn sim_config_for_seed_uses_correct_seed() {
        let config = CampaignConfig::default();
        let sim = config.sim_config_for_seed(42);
        assert_eq!(sim.seed, 42);
        assert_eq!(sim.client_count, config.client_count);
        assert_eq!(sim.fault.write_failure_percent, config.fault_write_failure_percent);
    }

    #[test]
    fn run_campaign_all_seeds_pass() {
        let config = CampaignConfig {
            seed_range: 0..20,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).unwrap();
        assert_eq!(report.seeds_run, 20);
        assert!(report.all_passed(), "failures: {:?}", report.failures);
        assert_eq!(report.first_failure, None);
    }

    #[test]
    fn replay_seed_matches_campaign_result() {
        let config = CampaignConfig {
            seed_range: 3..4,
            ..CampaignConfig::default()
        };
        let trace = replay_seed(3, &config).unwrap();
        assert!(trace.oracle.passed);
        assert!(trace.created > 0);
        assert!(run_single_seed(3, &config).unwrap().is_ok());
    }

    #[test]
    fn format_violation_names_the_client() {
        let text = format_violation(&InvariantViolation::Unsettled {
            client: 2,
            pending: 1,
        });
        assert!(text.contains("client 2"));
    }
}
