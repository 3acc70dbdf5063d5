//! Outstanding asynchronous call results.
//!
//! Every entry ends resolved, rejected or cancelled. Cancelled and timed-out ids
//! stay inert until their late record shows up or [`INERT_RETENTION`] passes.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{BridgeError, LifecycleError, NativeCallError};
use crate::event::{self, CallbackEvent, CallbackRecord, CallbackTag};

pub type CallOutcome = Result<CallbackEvent, BridgeError>;

/// How long a cancelled or timed-out id is remembered. A result arriving later
/// than this is discarded as unknown.
pub(crate) const INERT_RETENTION: Duration = Duration::from_secs(600);

struct PendingEntry {
    expected: CallbackTag,
    deadline: Option<Instant>,
    tx: oneshot::Sender<CallOutcome>,
}

/// How a correlated record was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Resolved,
    Rejected,
    Discarded,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: DashMap<u64, PendingEntry>,
    /// Cancelled or timed-out ids, with the time they went inert.
    inert: DashMap<u64, Instant>,
}

impl PendingTable {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn register(
        self: &Arc<Self>,
        id: u64,
        expected: CallbackTag,
        timeout: Option<Duration>,
    ) -> CallFuture {
        let (tx, rx) = oneshot::channel();
        self.inert.remove(&id);
        self.entries.insert(
            id,
            PendingEntry {
                expected,
                deadline: timeout.map(|t| Instant::now() + t),
                tx,
            },
        );
        tracing::trace!(id, expected = expected.0, "async call pending");
        CallFuture {
            id,
            rx,
            table: Arc::downgrade(self),
            finished: false,
        }
    }

    /// Settle the entry matching a correlated record.
    pub(crate) fn complete(&self, id: u64, record: &CallbackRecord) -> Completion {
        if self.inert.remove(&id).is_some() {
            tracing::debug!(id, "discarding late result for cancelled call");
            return Completion::Discarded;
        }
        let Some((_, entry)) = self.entries.remove(&id) else {
            tracing::debug!(id, "discarding result for unknown call");
            return Completion::Discarded;
        };

        let outcome = if record.failed {
            Err(NativeCallError::AsyncCallFailed(id).into())
        } else if record.tag != entry.expected {
            Err(NativeCallError::UnexpectedResult {
                id,
                expected: entry.expected,
                got: record.tag,
            }
            .into())
        } else {
            event::decode(record).map_err(BridgeError::from)
        };

        let completion = if outcome.is_ok() {
            Completion::Resolved
        } else {
            Completion::Rejected
        };
        if entry.tx.send(outcome).is_err() {
            tracing::trace!(id, "async call result had no receiver");
        }
        completion
    }

    /// Reject every entry whose deadline is at or before `now`, and forget inert
    /// ids older than [`INERT_RETENTION`].
    pub(crate) fn expire(&self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.deadline.is_some_and(|d| d <= now))
            .map(|e| *e.key())
            .collect();
        let mut count = 0;
        for id in expired {
            if let Some((_, entry)) = self.entries.remove(&id) {
                self.inert.insert(id, now);
                let _ = entry.tx.send(Err(NativeCallError::TimedOut(id).into()));
                tracing::debug!(id, "async call timed out");
                count += 1;
            }
        }
        self.inert
            .retain(|_, since| now.saturating_duration_since(*since) < INERT_RETENTION);
        count
    }

    /// Mark an entry inert. Returns false if it had already settled.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        if self.entries.remove(&id).is_some() {
            self.inert.insert(id, Instant::now());
            tracing::debug!(id, "async call cancelled");
            true
        } else {
            false
        }
    }

    /// Reject everything outstanding; used when the library goes away.
    pub(crate) fn reject_all(&self, error: LifecycleError) -> usize {
        let ids: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        let mut count = 0;
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let _ = entry.tx.send(Err(error.clone().into()));
                count += 1;
            }
        }
        self.inert.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn inert_len(&self) -> usize {
        self.inert.len()
    }
}

/// Result of an asynchronous native call, completed on a later dispatch tick.
///
/// Dropping the future before it completes cancels the call.
#[must_use = "dropping a CallFuture cancels the call"]
pub struct CallFuture {
    id: u64,
    rx: oneshot::Receiver<CallOutcome>,
    table: Weak<PendingTable>,
    finished: bool,
}

impl CallFuture {
    /// A future that is already settled, for calls that failed before reaching
    /// native code.
    pub(crate) fn settled(outcome: CallOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self {
            id: 0,
            rx,
            table: Weak::new(),
            finished: false,
        }
    }

    /// Native correlation id; 0 for calls that never reached native code.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Give up on the result. A late record for this call is discarded.
    pub fn cancel(mut self) -> bool {
        self.finished = true;
        self.table
            .upgrade()
            .is_some_and(|table| table.cancel(self.id))
    }
}

impl Future for CallFuture {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(LifecycleError::ShutdownPending.into()),
        };
        self.finished = true;
        Poll::Ready(outcome)
    }
}

impl Drop for CallFuture {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            table.cancel(self.id);
        }
    }
}

impl std::fmt::Debug for CallFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFuture")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}
