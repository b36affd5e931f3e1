//! Port to the authoritative remote store.
//!
//! The engine never talks to a concrete backend; it is generic over
//! [`RemoteStore`]. `huddle-sim` provides the in-memory implementation used
//! by tests and simulations.

use std::fmt;

use async_trait::async_trait;
use huddle_core::{ChangeEvent, NewTask, RecordId, RemoteError, ScopeFilter, TaskPatch, TaskRecord};
use tokio::sync::mpsc;

/// Remote identity of one change-feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedHandle(pub u64);

impl fmt::Display for FeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed#{}", self.0)
    }
}

/// One message on a live change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Change(ChangeEvent),
    /// The feed is dead; nothing further arrives on this connection.
    Disconnected,
}

/// A live subscription: the handle to release and the event stream.
#[derive(Debug)]
pub struct FeedConnection {
    pub handle: FeedHandle,
    pub events: mpsc::UnboundedReceiver<FeedMessage>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Authoritative snapshot of every record matching `filter`.
    async fn read(&self, filter: &ScopeFilter) -> Result<Vec<TaskRecord>, RemoteError>;

    /// Open a change feed for `filter`.
    async fn subscribe(&self, filter: &ScopeFilter) -> Result<FeedConnection, RemoteError>;

    /// Release a feed. Unknown handles are ignored.
    async fn unsubscribe(&self, handle: FeedHandle);

    /// Insert a record; the returned record carries the canonical id.
    async fn write_create(&self, new: &NewTask) -> Result<TaskRecord, RemoteError>;

    async fn write_update(&self, id: &RecordId, patch: &TaskPatch)
    -> Result<TaskRecord, RemoteError>;

    async fn write_delete(&self, id: &RecordId) -> Result<(), RemoteError>;
}
