//! huddle-sim library.
//!
//! Deterministic simulation of many clients sharing one authoritative task
//! store over faulty change feeds, plus an in-memory [`SimRemote`] for
//! driving a live engine in tests.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Determinism**: all randomness flows from one seeded [`DeterministicRng`].

pub mod campaign;
pub mod client;
pub mod clock;
pub mod network;
pub mod oracle;
pub mod remote;
pub mod rng;
pub mod server;
pub mod simulator;

pub use campaign::{CampaignConfig, CampaignReport, run_campaign};
pub use remote::SimRemote;
pub use rng::DeterministicRng;
pub use server::SimServer;
pub use simulator::{SimulationConfig, SimulationResult, Simulator, TraceEvent, TraceEventKind};
