//! [`Engine`]: the async face of the synchronization engine.
//!
//! Cloning an engine is cheap; clones share one [`SyncState`], one remote
//! and one set of feed pumps. All public methods take `&self`.
//!
//! Mutations apply their optimistic change when the method is called,
//! before the returned future is first polled, and the remote write runs
//! on a spawned task. Writes for one record go out in call order.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use huddle_core::config::{ReconnectConfig, load_config};
use huddle_core::{
    Activation, Closure, CompletionSignal, EngineConfig, ListPage, MutationError,
    MutationOutcome, NewTask, Page, PendingWrite, ReconcileCounters, RecordId, RemoteAck, Scope,
    ScopeContext, ScopeKey, ScopeStats, Status, SubscriptionHandle, SyncState, TaskPatch,
    TaskRecord, ViewFilter, WriteRequest, WriteTicket,
};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::remote::RemoteStore;
use crate::subscriber::{Backoff, FeedCounters, Pump};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a diagnostics panel wants to know about a running engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    pub reconcile: ReconcileCounters,
    pub pending_mutations: usize,
    pub open_scopes: usize,
    pub feed_disconnects: u64,
    pub feed_reconnects: u64,
    /// Feed pumps spawned and not yet stopped.
    pub live_feeds: usize,
}

// ---------------------------------------------------------------------------
// Write lanes
// ---------------------------------------------------------------------------

/// Per-record FIFO of remote writes.
///
/// Each write, at issue time, takes the completion receiver of the write
/// queued before it on the same lane and leaves its own in its place.
#[derive(Debug, Default)]
struct Lanes {
    tails: Mutex<HashMap<RecordId, (u64, oneshot::Receiver<()>)>>,
    next_turn: Mutex<u64>,
}

#[derive(Debug)]
struct LaneTurn {
    lane: RecordId,
    turn: u64,
    prior: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl Lanes {
    fn enter(&self, lane: &RecordId) -> LaneTurn {
        let turn = {
            let mut next = lock(&self.next_turn);
            *next += 1;
            *next
        };
        let (done, tail) = oneshot::channel();
        let prior = lock(&self.tails)
            .insert(lane.clone(), (turn, tail))
            .map(|(_, rx)| rx);
        LaneTurn {
            lane: lane.clone(),
            turn,
            prior,
            done,
        }
    }

    fn leave(&self, turn: LaneTurn) {
        let LaneTurn {
            lane, turn, done, ..
        } = turn;
        let mut tails = lock(&self.tails);
        if tails.get(&lane).is_some_and(|(last, _)| *last == turn) {
            tails.remove(&lane);
        }
        drop(tails);
        // Successors wake on send or on drop alike.
        let _ = done.send(());
    }

    fn len(&self) -> usize {
        lock(&self.tails).len()
    }
}

impl LaneTurn {
    async fn wait(&mut self) {
        if let Some(prior) = self.prior.take() {
            let _ = prior.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FeedTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner<R> {
    state: Arc<Mutex<SyncState>>,
    remote: Arc<R>,
    reconnect: ReconnectConfig,
    feeds: Mutex<HashMap<ScopeKey, FeedTask>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    lanes: Lanes,
    completions: broadcast::Sender<CompletionSignal>,
    feed_counters: Arc<FeedCounters>,
}

pub struct Engine<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Queued {
    Write(PendingWrite, LaneTurn),
    Stale(RecordId),
}

impl<R: RemoteStore> Engine<R> {
    /// Build an engine. The config is expected to have passed
    /// [`EngineConfig::validate`].
    #[must_use]
    pub fn new(remote: Arc<R>, config: EngineConfig) -> Self {
        let (completions, _) = broadcast::channel(config.events.completion_capacity.max(1));
        let reconnect = config.reconnect.clone();
        Self {
            inner: Arc::new(Inner {
                state: Arc::new(Mutex::new(SyncState::new(config))),
                remote,
                reconnect,
                feeds: Mutex::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                lanes: Lanes::default(),
                completions,
                feed_counters: Arc::new(FeedCounters::default()),
            }),
        }
    }

    /// Load, validate and apply a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or holds settings the
    /// engine cannot run with.
    pub fn from_config_path(remote: Arc<R>, path: &Path) -> Result<Self> {
        let config = load_config(path)?;
        config
            .validate()
            .with_context(|| format!("Invalid engine config in {}", path.display()))?;
        Ok(Self::new(remote, config))
    }

    #[must_use]
    pub fn remote(&self) -> &Arc<R> {
        &self.inner.remote
    }

    // -----------------------------------------------------------------------
    // Scope lifecycle
    // -----------------------------------------------------------------------

    /// Open a view over the scope resolved from `ctx`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime and the scope needs a new
    /// feed.
    pub fn open_context(&self, ctx: &ScopeContext) -> SubscriptionHandle {
        self.open(ctx.resolve())
    }

    /// Open a view over `scope`. Equal scopes share one remote feed.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime and the scope needs a new
    /// feed.
    #[allow(clippy::significant_drop_tightening)] // feed is registered under the state lock
    pub fn open(&self, scope: Scope) -> SubscriptionHandle {
        let mut state = lock(&self.inner.state);
        let (handle, activation) = state.open(scope);
        if let Activation::Started { key, scope } = activation {
            self.spawn_feed(key, scope);
        }
        drop(state);
        handle
    }

    fn spawn_feed(&self, key: ScopeKey, scope: Scope) {
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("feed", %key, %scope);
        let pump = Pump {
            key,
            scope,
            state: Arc::clone(&self.inner.state),
            remote: Arc::clone(&self.inner.remote),
            counters: Arc::clone(&self.inner.feed_counters),
            backoff: Backoff::new(&self.inner.reconnect),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(pump.run().instrument(span));
        lock(&self.inner.feeds).insert(key, FeedTask { cancel, task });
    }

    /// Release one consumer. The last consumer of a scope stops its feed;
    /// no event for the scope is applied after this returns.
    #[allow(clippy::significant_drop_tightening)] // feed is removed under the state lock
    pub fn close(&self, handle: &SubscriptionHandle) -> Closure {
        let mut state = lock(&self.inner.state);
        let closure = state.close(handle);
        let feed = match &closure {
            Closure::Released { key, .. } => lock(&self.inner.feeds).remove(key),
            Closure::Retained { .. } | Closure::Unknown => None,
        };
        drop(state);
        if let Some(FeedTask { cancel, task }) = feed {
            cancel.cancel();
            lock(&self.inner.retired).push(task);
        }
        closure
    }

    /// Wait until every feed stopped by [`close`](Self::close) has released
    /// its remote handle.
    pub async fn settle(&self) {
        let retired: Vec<JoinHandle<()>> = lock(&self.inner.retired).drain(..).collect();
        for task in retired {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "feed pump panicked");
            }
        }
    }

    /// Stop every feed and wait for them to release their handles. Open
    /// scopes stay registered; their caches are kept but no longer updated.
    pub async fn shutdown(&self) {
        let feeds: Vec<FeedTask> = lock(&self.inner.feeds).drain().map(|(_, feed)| feed).collect();
        for feed in &feeds {
            feed.cancel.cancel();
        }
        lock(&self.inner.retired).extend(feeds.into_iter().map(|feed| feed.task));
        self.settle().await;
        tracing::info!("engine shut down");
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn list(&self, scope: &Scope, filter: &ViewFilter, page: Page) -> ListPage {
        lock(&self.inner.state).list(scope, filter, page, Utc::now())
    }

    /// Stats of `scope`; cached when the scope is open.
    #[must_use]
    pub fn stats(&self, scope: &Scope) -> ScopeStats {
        lock(&self.inner.state).stats_for(scope)
    }

    /// Visible value of a record, following provisional ids.
    #[must_use]
    pub fn record(&self, id: &RecordId) -> Option<TaskRecord> {
        lock(&self.inner.state).record(id).cloned()
    }

    /// Subscribe to confirmed transitions into `done`.
    #[must_use]
    pub fn completions(&self) -> broadcast::Receiver<CompletionSignal> {
        self.inner.completions.subscribe()
    }

    #[must_use]
    pub fn counters(&self) -> EngineCounters {
        let state = lock(&self.inner.state);
        let counters = EngineCounters {
            reconcile: state.counters(),
            pending_mutations: state.pending_count(),
            open_scopes: state.registry().len(),
            feed_disconnects: self.inner.feed_counters.disconnects(),
            feed_reconnects: self.inner.feed_counters.reconnects(),
            live_feeds: lock(&self.inner.feeds).len(),
        };
        drop(state);
        counters
    }

    /// Run `f` against the synchronous state. The lock is held for the
    /// duration of the call.
    pub fn inspect<T>(&self, f: impl FnOnce(&SyncState) -> T) -> T {
        f(&lock(&self.inner.state))
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create a task. The provisional record is visible immediately; the
    /// outcome carries the canonical id.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn create(
        &self,
        new: NewTask,
    ) -> impl Future<Output = Result<MutationOutcome, MutationError>> + Send + 'static + use<R> {
        let queued = self.begin(|state| state.begin_create(new, Utc::now()));
        self.dispatch(queued)
    }

    /// Apply a partial update.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn update(
        &self,
        id: &RecordId,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<MutationOutcome, MutationError>> + Send + 'static + use<R> {
        let queued = self.begin(|state| state.begin_update(id, patch, Utc::now()));
        self.dispatch(queued)
    }

    /// Move a task to `status`. A confirmed move into `done` from any other
    /// status is announced on [`completions`](Self::completions).
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn transition_status(
        &self,
        id: &RecordId,
        status: Status,
    ) -> impl Future<Output = Result<MutationOutcome, MutationError>> + Send + 'static + use<R> {
        let queued = self.begin(|state| state.begin_transition(id, status, Utc::now()));
        self.dispatch(queued)
    }

    /// Delete a task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn delete(
        &self,
        id: &RecordId,
    ) -> impl Future<Output = Result<MutationOutcome, MutationError>> + Send + 'static + use<R> {
        let queued = self.begin(|state| state.begin_delete(id, Utc::now()));
        self.dispatch(queued)
    }

    /// Run a `begin_*` step and take the write's lane turn before the state
    /// lock is released, so lane order matches intent order.
    #[allow(clippy::significant_drop_tightening)] // lane turn is taken under the state lock
    fn begin(
        &self,
        step: impl FnOnce(&mut SyncState) -> Result<WriteTicket, MutationError>,
    ) -> Result<Queued, MutationError> {
        let mut state = lock(&self.inner.state);
        step(&mut state).map(|ticket| match ticket {
            WriteTicket::Issue(write) => {
                let turn = self.inner.lanes.enter(&write.lane);
                Queued::Write(write, turn)
            }
            WriteTicket::Stale(id) => Queued::Stale(id),
        })
    }

    fn dispatch(
        &self,
        queued: Result<Queued, MutationError>,
    ) -> impl Future<Output = Result<MutationOutcome, MutationError>> + Send + 'static + use<R> {
        let task = match queued {
            Ok(Queued::Write(write, turn)) => {
                let inner = Arc::clone(&self.inner);
                Ok(tokio::spawn(async move { inner.drive(write, turn).await }))
            }
            Ok(Queued::Stale(id)) => Err(Ok(MutationOutcome::Stale(id))),
            Err(err) => Err(Err(err)),
        };
        async move {
            match task {
                Ok(task) => task.await.unwrap_or_else(|err| {
                    Err(MutationError::Internal(format!("write task failed: {err}")))
                }),
                Err(settled) => settled,
            }
        }
    }

    /// Number of records with writes queued or in flight.
    #[must_use]
    pub fn busy_lanes(&self) -> usize {
        self.inner.lanes.len()
    }
}

impl<R: RemoteStore> Inner<R> {
    async fn drive(
        &self,
        write: PendingWrite,
        mut turn: LaneTurn,
    ) -> Result<MutationOutcome, MutationError> {
        turn.wait().await;

        let target = lock(&self.state).prepare(&write);
        let Some(target) = target else {
            let outcome = lock(&self.state).cancelled(&write);
            self.lanes.leave(turn);
            return Ok(outcome);
        };

        tracing::debug!(
            id = %write.record_id,
            %target,
            mutation_id = %write.mutation_id,
            "sending write"
        );
        let result = match &write.request {
            WriteRequest::Create(new) => self.remote.write_create(new).await.map(RemoteAck::Created),
            WriteRequest::Update(patch) => self
                .remote
                .write_update(&target, patch)
                .await
                .map(RemoteAck::Updated),
            WriteRequest::Delete => self
                .remote
                .write_delete(&target)
                .await
                .map(|()| RemoteAck::Deleted),
        };

        let resolved = lock(&self.state).complete(write, result);
        self.lanes.leave(turn);
        let resolved = resolved?;
        if let Some(signal) = resolved.completed {
            tracing::info!(id = %signal.record_id, "task completed");
            // No receivers is fine.
            let _ = self.completions.send(signal);
        }
        Ok(resolved.outcome)
    }
}
