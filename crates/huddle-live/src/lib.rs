//! huddle-live library.
//!
//! Async driver over `huddle-core`: one feed pump per open scope with
//! reconnect and resync, and optimistic writes sent through per-record
//! write lanes.
//!
//! # Conventions
//!
//! - **Errors**: caller-facing failures are `huddle_core::MutationError`;
//!   setup paths use `anyhow::Result`.
//! - **Logging**: use `tracing` macros; each feed pump runs inside a `feed`
//!   span carrying its scope key.
//! - **Locking**: the shared `SyncState` lock is never held across `.await`.

pub mod engine;
pub mod remote;
mod subscriber;

pub use engine::{Engine, EngineCounters};
pub use remote::{FeedConnection, FeedHandle, FeedMessage, RemoteStore};
pub use subscriber::Backoff;
