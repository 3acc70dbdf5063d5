use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::event::{CallbackEvent, CallbackTag};

pub type Handler = Arc<dyn Fn(&CallbackEvent) + Send + Sync>;

/// Returned by listener registration; pass to `off` to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationHandle(u64);

struct Listener {
    id: u64,
    tag: CallbackTag,
    handler: Handler,
    once: bool,
}

/// Registered listeners, in registration order.
pub(crate) struct ListenerTable {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl ListenerTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, tag: CallbackTag, handler: Handler, once: bool) -> RegistrationHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Listener {
            id,
            tag,
            handler,
            once,
        });
        RegistrationHandle(id)
    }

    pub(crate) fn remove(&self, handle: RegistrationHandle) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != handle.0);
        listeners.len() != before
    }

    pub(crate) fn has(&self, tag: CallbackTag) -> bool {
        self.listeners.lock().iter().any(|l| l.tag == tag)
    }

    /// Handlers for `tag`, in order. One-shot listeners are removed before they
    /// are returned so they can never run twice.
    pub(crate) fn take_for(&self, tag: CallbackTag) -> Vec<Handler> {
        let mut listeners = self.listeners.lock();
        let handlers = listeners
            .iter()
            .filter(|l| l.tag == tag)
            .map(|l| l.handler.clone())
            .collect();
        listeners.retain(|l| !(l.once && l.tag == tag));
        handlers
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().len()
    }
}
