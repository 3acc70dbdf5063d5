//! Callback dispatch engine.
//!
//! A tick pumps the native queue (under the native lock, done by the caller) and
//! hands the records here. Delivery happens with no lock held, in native order.
//! A record with a correlation id settles its pending call; anything else is
//! decoded and passed to the listeners for its tag. One bad record never stops
//! the rest of the batch.

mod listeners;
mod pending;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

pub use listeners::{Handler, RegistrationHandle};
pub use pending::{CallFuture, CallOutcome};

use crate::error::LifecycleError;
use crate::event::{self, CallbackRecord, CallbackTag};
use listeners::ListenerTable;
use pending::{Completion, PendingTable};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Records pumped from the native queue.
    pub pumped: usize,
    /// Records handed to at least one listener.
    pub delivered: usize,
    /// Records nobody was listening for.
    pub unobserved: usize,
    /// Records that failed to decode.
    pub skipped: usize,
    /// Listener invocations that panicked.
    pub panicked: usize,
    pub resolved: usize,
    pub rejected: usize,
    /// Call results for cancelled, timed-out or unknown calls.
    pub discarded: usize,
    pub expired: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == TickReport::default()
    }
}

pub(crate) struct Dispatcher {
    listeners: ListenerTable,
    pending: Arc<PendingTable>,
    delivering: AtomicBool,
}

/// Clears the delivering flag when the tick ends, even if a listener panics.
pub(crate) struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            listeners: ListenerTable::new(),
            pending: PendingTable::new(),
            delivering: AtomicBool::new(false),
        }
    }

    /// Start a tick. Fails while another tick is still pumping or delivering.
    pub(crate) fn enter(&self) -> Result<TickGuard<'_>, LifecycleError> {
        self.delivering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LifecycleError::ReentrantDispatch)?;
        Ok(TickGuard(&self.delivering))
    }

    pub(crate) fn listeners(&self) -> &ListenerTable {
        &self.listeners
    }

    pub(crate) fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// Deliver a pumped batch, then expire overdue calls.
    pub(crate) fn deliver(&self, _tick: &TickGuard<'_>, records: Vec<CallbackRecord>) -> TickReport {
        let mut report = TickReport {
            pumped: records.len(),
            ..TickReport::default()
        };
        for record in records {
            match record.correlation {
                Some(id) => match self.pending.complete(id, &record) {
                    Completion::Resolved => report.resolved += 1,
                    Completion::Rejected => report.rejected += 1,
                    Completion::Discarded => report.discarded += 1,
                },
                None => self.notify(&record, &mut report),
            }
        }
        report.expired = self.pending.expire(Instant::now());
        report
    }

    fn notify(&self, record: &CallbackRecord, report: &mut TickReport) {
        if !self.listeners.has(record.tag) {
            tracing::trace!("no listener for {}", record.tag);
            report.unobserved += 1;
            return;
        }
        let event = match event::decode(record) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("skipping {} ({} bytes): {e}", record.tag, record.size());
                report.skipped += 1;
                return;
            }
        };
        let handlers = self.listeners.take_for(record.tag);
        tracing::trace!("delivering {} to {} listeners", record.tag, handlers.len());
        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::warn!("listener for {} panicked", record.tag);
                report.panicked += 1;
            }
        }
        report.delivered += 1;
    }

    pub(crate) fn listens_to(&self, tag: CallbackTag) -> bool {
        self.listeners.has(tag)
    }
}
