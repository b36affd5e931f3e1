#![forbid(unsafe_code)]

use std::env;

use anyhow::{Result, bail};
use clap::Parser;
use huddle_sim::campaign::{self, CampaignConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "huddle-sim: deterministic multi-client sync campaigns",
    long_about = None
)]
struct Cli {
    /// First seed to run.
    #[arg(long, default_value_t = 0)]
    first_seed: u64,

    /// Number of seeds to run.
    #[arg(long, default_value_t = 100)]
    seeds: u64,

    /// Simulated clients per seed.
    #[arg(long, default_value_t = 4)]
    clients: usize,

    /// Rounds per seed.
    #[arg(long, default_value_t = 40)]
    rounds: u64,

    /// Percent of notifications delivered twice.
    #[arg(long, default_value_t = 10)]
    duplicate: u8,

    /// Percent chance per round of reversing the ready batch.
    #[arg(long, default_value_t = 15)]
    reorder: u8,

    /// Percent chance per round of killing a random feed.
    #[arg(long, default_value_t = 5)]
    disconnect: u8,

    /// Percent of remote writes that fail.
    #[arg(long, default_value_t = 10)]
    write_failures: u8,

    /// Replay one seed and print its trace instead of running a campaign.
    #[arg(long)]
    replay: Option<u64>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn campaign_config(&self) -> CampaignConfig {
        CampaignConfig {
            seed_range: self.first_seed..self.first_seed.saturating_add(self.seeds),
            client_count: self.clients,
            rounds: self.rounds,
            fault_duplicate_percent: self.duplicate,
            fault_reorder_percent: self.reorder,
            fault_disconnect_percent: self.disconnect,
            fault_write_failure_percent: self.write_failures,
            ..CampaignConfig::default()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HUDDLE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "huddle=debug,info"
        } else {
            "huddle=info,warn"
        })
    });

    let format = env::var("HUDDLE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact()).init();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.campaign_config();

    if let Some(seed) = cli.replay {
        let trace = campaign::replay_seed(seed, &config)?;
        for event in &trace.result.trace {
            println!("[{:>4}] {:?}", event.round, event.kind);
        }
        println!(
            "seed {seed}: creates={} server_records={} converged={} passed={}",
            trace.created,
            trace.result.server.len(),
            trace.result.convergence.converged,
            trace.oracle.passed
        );
        for violation in &trace.oracle.violations {
            println!("  {}", campaign::format_violation(violation));
        }
        if !trace.oracle.passed {
            bail!("seed {seed} violated invariants");
        }
        return Ok(());
    }

    let report = campaign::run_campaign(&config)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} interesting={} first_failure={:?}",
            report.seeds_run,
            report.seeds_passed,
            report.interesting_states_reached,
            report.first_failure
        );
        for failure in &report.failures {
            println!("seed {}:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }

    if !report.all_passed() {
        bail!("{} seed(s) failed", report.failures.len());
    }
    Ok(())
}
