//! huddle-core library.
//!
//! Sans-IO synchronization engine for shared task records: a local cache of
//! a server-held collection, kept consistent with concurrent remote writes,
//! with optimistic local mutations and per-scope statistics.
//!
//! # Conventions
//!
//! - **Errors**: caller-facing failures are [`MutationError`]; config and
//!   tooling paths use `anyhow::Result`.
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).
//! - **Time**: every operation that needs "now" takes it as an argument.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod pending;
pub mod reconcile;
pub mod registry;
pub mod scope;
pub mod state;
pub mod store;
pub mod view;

pub use aggregate::ScopeStats;
pub use config::EngineConfig;
pub use error::{ErrorCode, MutationError, RemoteError};
pub use gateway::{
    CompletionSignal, MutationOutcome, PendingWrite, RemoteAck, Resolved, WriteRequest,
    WriteTicket,
};
pub use model::{
    ChangeEvent, ChangeOp, NewTask, Priority, RecordId, SpaceId, Status, TaskPatch, TaskRecord,
    UserId,
};
pub use reconcile::{ReconcileCounters, RemoteOutcome, ResyncOutcome, ResyncSummary};
pub use registry::{Activation, Closure, ScopeKey, SubscriptionHandle};
pub use scope::{Scope, ScopeContext, ScopeFilter, SharingMode};
pub use state::SyncState;
pub use view::{DueWindow, ListPage, Page, SharingFilter, ViewFilter};
