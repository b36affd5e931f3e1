//! In-memory [`RemoteStore`] for driving a live engine in tests.
//!
//! Wraps a [`SimServer`] and fans every write out to the matching feeds.
//! Test hooks can kill feeds or fail writes. Reads, writes and subscribes
//! can be parked until released, and writes can be made on behalf of
//! other users.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use huddle_core::{
    ChangeEvent, NewTask, RecordId, RemoteError, ScopeFilter, TaskPatch, TaskRecord,
};
use huddle_live::{FeedConnection, FeedHandle, FeedMessage, RemoteStore};
use tokio::sync::{mpsc, watch};

use crate::server::SimServer;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Feed {
    filter: ScopeFilter,
    tx: mpsc::UnboundedSender<FeedMessage>,
}

pub struct SimRemote {
    server: Mutex<SimServer>,
    feeds: Mutex<HashMap<FeedHandle, Feed>>,
    next_feed: AtomicU64,
    failures: Mutex<VecDeque<RemoteError>>,
    reads_open: watch::Sender<bool>,
    writes_open: watch::Sender<bool>,
    subscribes_open: watch::Sender<bool>,
    reads: AtomicUsize,
    subscribes: AtomicUsize,
}

impl Default for SimRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            server: Mutex::new(SimServer::new()),
            feeds: Mutex::new(HashMap::new()),
            next_feed: AtomicU64::new(0),
            failures: Mutex::new(VecDeque::new()),
            reads_open: watch::Sender::new(true),
            writes_open: watch::Sender::new(true),
            subscribes_open: watch::Sender::new(true),
            reads: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
        }
    }

    // ── Inspection ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn records(&self) -> Vec<TaskRecord> {
        lock(&self.server).records().cloned().collect()
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<TaskRecord> {
        lock(&self.server).get(id).cloned()
    }

    /// Live feeds not yet released.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.feeds).len()
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    // ── Fault hooks ─────────────────────────────────────────────────────────

    /// Kill every live feed. Subscribers see `Disconnected`.
    pub fn disconnect_all(&self) {
        let dead: Vec<Feed> = lock(&self.feeds).drain().map(|(_, feed)| feed).collect();
        for feed in dead {
            let _ = feed.tx.send(FeedMessage::Disconnected);
        }
    }

    /// The next write fails with `err` instead of reaching the server.
    pub fn fail_next_write(&self, err: RemoteError) {
        lock(&self.failures).push_back(err);
    }

    /// Park reads until [`release_reads`](Self::release_reads).
    pub fn hold_reads(&self) {
        self.reads_open.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.reads_open.send_replace(true);
    }

    /// Park writes until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.writes_open.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.writes_open.send_replace(true);
    }

    /// Park subscribes before they register a feed.
    pub fn hold_subscribes(&self) {
        self.subscribes_open.send_replace(false);
    }

    pub fn release_subscribes(&self) {
        self.subscribes_open.send_replace(true);
    }

    // ── Writes by other users ───────────────────────────────────────────────

    pub fn foreign_create(&self, new: &NewTask) -> TaskRecord {
        let event = lock(&self.server).create(new, Utc::now());
        let record = event.record.clone();
        self.fan_out(&event, None);
        record
    }

    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] for an unknown id.
    pub fn foreign_update(&self, id: &RecordId, patch: &TaskPatch) -> Result<TaskRecord, RemoteError> {
        let (before, event) = lock(&self.server).update(id, patch, Utc::now())?;
        let record = event.record.clone();
        self.fan_out(&event, Some(&before));
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] for an unknown id.
    pub fn foreign_delete(&self, id: &RecordId) -> Result<(), RemoteError> {
        let event = lock(&self.server).delete(id, Utc::now())?;
        self.fan_out(&event, None);
        Ok(())
    }

    /// Place a record on the server without notifying anyone.
    pub fn seed(&self, record: TaskRecord) {
        lock(&self.server).seed(record);
    }

    fn fan_out(&self, event: &ChangeEvent, before: Option<&TaskRecord>) {
        let feeds = lock(&self.feeds);
        for feed in feeds.values() {
            let sees = feed.filter.matches(&event.record)
                || before.is_some_and(|rec| feed.filter.matches(rec));
            if sees {
                let _ = feed.tx.send(FeedMessage::Change(event.clone()));
            }
        }
    }

    async fn gate(open: &watch::Sender<bool>) {
        let mut rx = open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }

    async fn admit_write(&self) -> Result<(), RemoteError> {
        Self::gate(&self.writes_open).await;
        match lock(&self.failures).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for SimRemote {
    async fn read(&self, filter: &ScopeFilter) -> Result<Vec<TaskRecord>, RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Self::gate(&self.reads_open).await;
        Ok(lock(&self.server).read(filter))
    }

    async fn subscribe(&self, filter: &ScopeFilter) -> Result<FeedConnection, RemoteError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Self::gate(&self.subscribes_open).await;
        let handle = FeedHandle(self.next_feed.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, events) = mpsc::unbounded_channel();
        lock(&self.feeds).insert(
            handle,
            Feed {
                filter: filter.clone(),
                tx,
            },
        );
        Ok(FeedConnection { handle, events })
    }

    async fn unsubscribe(&self, handle: FeedHandle) {
        lock(&self.feeds).remove(&handle);
    }

    async fn write_create(&self, new: &NewTask) -> Result<TaskRecord, RemoteError> {
        self.admit_write().await?;
        Ok(self.foreign_create(new))
    }

    async fn write_update(
        &self,
        id: &RecordId,
        patch: &TaskPatch,
    ) -> Result<TaskRecord, RemoteError> {
        self.admit_write().await?;
        self.foreign_update(id, patch)
    }

    async fn write_delete(&self, id: &RecordId) -> Result<(), RemoteError> {
        self.admit_write().await?;
        self.foreign_delete(id)
    }
}
