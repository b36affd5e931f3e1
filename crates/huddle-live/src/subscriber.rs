//! Feed pump: one task per open scope.
//!
//! The pump owns the scope's remote feed. It subscribes, applies a full
//! snapshot as a resync, then forwards incremental events until the feed
//! dies or the scope closes. A dead feed is released, and after a backoff
//! delay the pump subscribes again and resyncs before resuming. The feed
//! handle is released on every exit path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use huddle_core::config::ReconnectConfig;
use huddle_core::{
    ErrorCode, RemoteOutcome, ResyncOutcome, Scope, ScopeFilter, ScopeKey, SyncState,
};
use tokio_util::sync::CancellationToken;

use crate::engine::lock;
use crate::remote::{FeedConnection, FeedHandle, FeedMessage, RemoteStore};

/// Exponential reconnect delay, doubling up to a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        let initial = Duration::from_millis(config.initial_delay_ms.max(1));
        let max = Duration::from_millis(config.max_delay_ms).max(initial);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub const fn reset(&mut self) {
        self.next = self.initial;
    }
}

#[derive(Debug, Default)]
pub(crate) struct FeedCounters {
    pub disconnects: AtomicU64,
    pub reconnects: AtomicU64,
}

impl FeedCounters {
    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

pub(crate) struct Pump<R> {
    pub key: ScopeKey,
    pub scope: Scope,
    pub state: Arc<Mutex<SyncState>>,
    pub remote: Arc<R>,
    pub counters: Arc<FeedCounters>,
    pub backoff: Backoff,
    pub cancel: CancellationToken,
}

enum FeedEnd {
    Closed,
    Disconnected,
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancel.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

impl<R: RemoteStore> Pump<R> {
    pub async fn run(mut self) {
        let filter = self.scope.filter();
        let mut attempt = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let subscribed = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = self.remote.subscribe(&filter) => Some(result),
            };
            let Some(subscribed) = subscribed else {
                break;
            };
            let connection = match subscribed {
                Ok(connection) => connection,
                Err(err) => {
                    tracing::warn!(code = %ErrorCode::FeedDisconnected, error = %err, "subscribe failed");
                    if pause(&self.cancel, self.backoff.next_delay()).await {
                        continue;
                    }
                    break;
                }
            };
            if attempt > 0 {
                self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                tracing::info!(attempt, handle = %connection.handle, "feed reconnected");
            }
            attempt += 1;

            let FeedConnection { handle, events } = connection;
            let end = self.serve(handle, events, &filter).await;
            self.remote.unsubscribe(handle).await;
            tracing::debug!(%handle, "released feed");

            match end {
                FeedEnd::Closed => break,
                FeedEnd::Disconnected => {
                    self.counters.disconnects.fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        code = %ErrorCode::FeedDisconnected,
                        %handle,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "feed disconnected"
                    );
                    if !pause(&self.cancel, delay).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!("feed pump stopped");
    }

    /// Resync then deliver events from one connection until it ends.
    async fn serve(
        &mut self,
        handle: FeedHandle,
        mut events: tokio::sync::mpsc::UnboundedReceiver<FeedMessage>,
        filter: &ScopeFilter,
    ) -> FeedEnd {
        let snapshot = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return FeedEnd::Closed,
            read = self.remote.read(filter) => read,
        };
        match snapshot {
            Ok(records) => {
                let outcome = lock(&self.state).resync(self.key, records);
                match outcome {
                    ResyncOutcome::Dropped => return FeedEnd::Closed,
                    ResyncOutcome::Applied(summary) => {
                        tracing::info!(
                            %handle,
                            upserted = summary.upserted,
                            removed = summary.removed,
                            rebased = summary.rebased,
                            ignored = summary.ignored,
                            "resynced scope"
                        );
                        self.backoff.reset();
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%handle, error = %err, "snapshot read failed");
                return FeedEnd::Disconnected;
            }
        }

        loop {
            let message = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return FeedEnd::Closed,
                message = events.recv() => message,
            };
            match message {
                Some(FeedMessage::Change(event)) => {
                    let id = event.record.id.clone();
                    let op = event.op;
                    let outcome = lock(&self.state).apply_remote(self.key, event);
                    if outcome == RemoteOutcome::Dropped {
                        return FeedEnd::Closed;
                    }
                    tracing::trace!(%id, %op, ?outcome, "delivered change");
                }
                Some(FeedMessage::Disconnected) | None => return FeedEnd::Disconnected,
            }
        }
    }
}
