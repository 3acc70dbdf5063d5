//! The manager-facing API.
//!
//! [`Bridge`] owns the single loaded native library, its interface registry and
//! the dispatch engine. It is cheap to clone; every clone talks to the same
//! library. All native calls and pumps go through one mutex, so the library
//! never sees overlapping calls.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::catalog::{self, FunctionSpec};
use crate::config::BridgeConfig;
use crate::dispatch::{CallFuture, Dispatcher, RegistrationHandle, TickReport};
use crate::error::{BridgeError, LifecycleError, NativeCallError};
use crate::event::{CallbackEvent, CallbackTag};
use crate::lifecycle::{InitGate, Lifecycle, LifecycleState};
use crate::marshal::{Arg, MarshalContext};
use crate::native::steam::SteamLoader;
use crate::native::{NativeApi, NativeLoader, NativeValue};
use crate::registry::{Epoch, InterfaceHandle, InterfaceKind, InterfaceRegistry};

/// State touched only under the native lock.
struct Core {
    native: Option<Box<dyn NativeApi>>,
    registry: InterfaceRegistry,
}

struct Inner {
    loader: Box<dyn NativeLoader>,
    lifecycle: Lifecycle,
    core: Mutex<Core>,
    dispatcher: Dispatcher,
    pump: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<BridgeError>>,
}

#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    pub fn new(loader: impl NativeLoader + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader: Box::new(loader),
                lifecycle: Lifecycle::new(),
                core: Mutex::new(Core {
                    native: None,
                    registry: InterfaceRegistry::new(),
                }),
                dispatcher: Dispatcher::new(),
                pump: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// A bridge over the real Steamworks library.
    pub fn steam() -> Self {
        Self::new(SteamLoader)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Load the library, initialize the SDK and open a new epoch.
    ///
    /// Returns `Ok` without doing anything when already initialized.
    pub fn initialize(&self, config: &BridgeConfig) -> Result<(), BridgeError> {
        match self.inner.lifecycle.begin_init() {
            Ok(InitGate::Proceed) => {}
            Ok(InitGate::AlreadyReady) => {
                tracing::debug!("initialize: already ready");
                return Ok(());
            }
            Err(e) => return Err(self.inner.fail(e.into())),
        }

        let result = self.inner.init(config);
        self.inner.lifecycle.finish_init(result.is_ok());
        match result {
            Ok(epoch) => {
                tracing::info!(epoch = epoch.0, "native library initialized");
                Ok(())
            }
            Err(e) => Err(self.inner.fail(e)),
        }
    }

    /// Stop the pump, wait for any in-flight call, shut the SDK down, unload the
    /// library and reject outstanding async calls.
    pub fn shutdown(&self) -> Result<(), LifecycleError> {
        if let Err(e) = self.inner.lifecycle.begin_shutdown() {
            self.inner.fail(e.clone().into());
            return Err(e);
        }
        if let Some(task) = self.inner.pump.lock().take() {
            task.abort();
        }

        let epoch = {
            let mut core = self.inner.core.lock();
            if let Some(mut native) = core.native.take() {
                native.shutdown();
            }
            core.registry.close_epoch();
            core.registry.epoch()
        };

        let rejected = self
            .inner
            .dispatcher
            .pending()
            .reject_all(LifecycleError::ShutdownPending);
        self.inner.lifecycle.finish_shutdown();
        tracing::info!(epoch = epoch.0, rejected, "native library shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lifecycle.is_ready()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    pub fn epoch(&self) -> Epoch {
        self.inner.core.lock().registry.epoch()
    }

    /// The most recent error any bridge operation ran into.
    pub fn last_error(&self) -> Option<BridgeError> {
        self.inner.last_error.lock().clone()
    }

    /// Record a failure detected by a manager before it reached the bridge.
    pub(crate) fn record_error(&self, error: impl Into<BridgeError>) -> BridgeError {
        self.inner.fail(error.into())
    }

    // ── Interfaces ──────────────────────────────────────────────────

    /// Look an interface up by name. `None` when not initialized, when the name
    /// is unknown, or when the native accessor returned null.
    pub fn get_interface(&self, name: &str) -> Option<InterfaceHandle> {
        let Some(kind) = InterfaceKind::from_name(name) else {
            tracing::warn!("unknown interface {name:?}");
            return None;
        };
        self.interface(kind)
    }

    pub fn interface(&self, kind: InterfaceKind) -> Option<InterfaceHandle> {
        if !self.is_initialized() {
            tracing::debug!("interface {}: not initialized", kind.name());
            return None;
        }
        let mut core = self.inner.core.lock();
        let Core { native, registry } = &mut *core;
        let native = native.as_mut()?;
        registry.get_or_resolve(kind, |kind| native.interface(kind))
    }

    // ── Calls ───────────────────────────────────────────────────────

    /// Call a catalogued function and return its value.
    pub fn try_call(
        &self,
        handle: InterfaceHandle,
        function: &str,
        args: &[Arg],
    ) -> Result<NativeValue, BridgeError> {
        self.inner
            .invoke(handle, function, args, |_, value| Ok(value))
            .map_err(|e| self.inner.fail(e))
    }

    /// Call a function for its side effect. Failures are logged and recorded in
    /// [`Bridge::last_error`], never returned.
    pub fn call_void(&self, handle: InterfaceHandle, function: &str, args: &[Arg]) {
        if let Err(e) = self.try_call(handle, function, args) {
            tracing::warn!("{}::{function} failed: {e}", handle.kind().name());
        }
    }

    /// Issue a call that completes through a later callback.
    pub fn call_async(&self, handle: InterfaceHandle, function: &str, args: &[Arg]) -> CallFuture {
        self.start_async(handle, function, args, None)
    }

    /// Like [`Bridge::call_async`], rejected with `TimedOut` if no result arrives
    /// within `timeout`. Deadlines are checked at the end of each tick.
    pub fn call_async_with_timeout(
        &self,
        handle: InterfaceHandle,
        function: &str,
        args: &[Arg],
        timeout: Duration,
    ) -> CallFuture {
        self.start_async(handle, function, args, Some(timeout))
    }

    fn start_async(
        &self,
        handle: InterfaceHandle,
        function: &str,
        args: &[Arg],
        timeout: Option<Duration>,
    ) -> CallFuture {
        let sync_spec = catalog::lookup(handle.kind(), function).filter(|s| s.result_tag().is_none());
        if let Some(spec) = sync_spec {
            let e = BridgeError::from(NativeCallError::NotAsync(spec.symbol));
            tracing::warn!("{}::{function} failed: {e}", handle.kind().name());
            return CallFuture::settled(Err(self.inner.fail(e)));
        }
        let pending = self.inner.dispatcher.pending();
        let result = self.inner.invoke(handle, function, args, |spec, value| {
            let tag = spec
                .result_tag()
                .ok_or(NativeCallError::NotAsync(spec.symbol))?;
            match value {
                NativeValue::ApiCall(0) => Err(NativeCallError::InvalidApiCall(spec.symbol).into()),
                NativeValue::ApiCall(id) => Ok(pending.register(id, tag, timeout)),
                _ => Err(NativeCallError::NotAsync(spec.symbol).into()),
            }
        });
        result.unwrap_or_else(|e| {
            tracing::warn!("{}::{function} failed: {e}", handle.kind().name());
            CallFuture::settled(Err(self.inner.fail(e)))
        })
    }

    // ── Listeners ───────────────────────────────────────────────────

    pub fn on_callback(
        &self,
        tag: CallbackTag,
        handler: impl Fn(&CallbackEvent) + Send + Sync + 'static,
    ) -> RegistrationHandle {
        self.inner
            .dispatcher
            .listeners()
            .add(tag, Arc::new(handler), false)
    }

    /// Listen for the next callback of `tag` only.
    pub fn once_callback(
        &self,
        tag: CallbackTag,
        handler: impl Fn(&CallbackEvent) + Send + Sync + 'static,
    ) -> RegistrationHandle {
        self.inner
            .dispatcher
            .listeners()
            .add(tag, Arc::new(handler), true)
    }

    pub fn off(&self, handle: RegistrationHandle) -> bool {
        self.inner.dispatcher.listeners().remove(handle)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.dispatcher.listeners().len()
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.dispatcher.pending().len()
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Run one dispatch tick: pump the native queue and deliver what it held.
    pub fn run_callbacks(&self) -> Result<TickReport, LifecycleError> {
        self.inner.tick()
    }

    /// Drive [`Bridge::run_callbacks`] from a tokio task every `interval`.
    ///
    /// Replaces a previously spawned pump. The task stops on shutdown.
    pub fn spawn_pump(&self, interval: Duration) -> Result<(), LifecycleError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| LifecycleError::NoRuntime)?;
        let state = self.state();
        if state != LifecycleState::Ready {
            return Err(LifecycleError::NotReady(state));
        }
        let task = runtime.spawn(pump_loop(Arc::downgrade(&self.inner), interval));
        if let Some(previous) = self.inner.pump.lock().replace(task) {
            previous.abort();
        }
        tracing::debug!("callback pump running every {interval:?}");
        Ok(())
    }
}

async fn pump_loop(inner: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match inner.tick() {
            Ok(report) if !report.is_idle() => tracing::trace!(?report, "tick"),
            Ok(_) => {}
            Err(LifecycleError::ReentrantDispatch) => {
                tracing::debug!("tick skipped: previous tick still delivering");
            }
            Err(e) => {
                tracing::debug!("callback pump stopping: {e}");
                break;
            }
        }
    }
}

impl Inner {
    fn init(&self, config: &BridgeConfig) -> Result<Epoch, BridgeError> {
        let app_id = config.app_id()?;
        let mut core = self.core.lock();
        let mut native = self.loader.load(config)?;
        native.init(app_id)?;
        let epoch = core.registry.open_epoch();
        core.native = Some(native);
        Ok(epoch)
    }

    /// Record an error for [`Bridge::last_error`] and hand it back.
    fn fail(&self, error: BridgeError) -> BridgeError {
        *self.last_error.lock() = Some(error.clone());
        error
    }

    /// The single path to a native entry point.
    ///
    /// Arguments are lowered before the lock is taken, so marshal failures never
    /// reach native code. `finish` runs under the lock.
    fn invoke<R>(
        &self,
        handle: InterfaceHandle,
        function: &str,
        args: &[Arg],
        finish: impl FnOnce(&'static FunctionSpec, NativeValue) -> Result<R, BridgeError>,
    ) -> Result<R, BridgeError> {
        let state = self.lifecycle.state();
        if state != LifecycleState::Ready {
            return Err(LifecycleError::NotReady(state).into());
        }
        let spec = catalog::lookup(handle.kind(), function).ok_or_else(|| {
            NativeCallError::UnknownFunction {
                interface: handle.kind(),
                function: function.to_string(),
            }
        })?;
        let mut marshal = MarshalContext::new();
        let raw = marshal.lower_all(args, spec.params)?;

        let mut core = self.core.lock();
        let state = self.lifecycle.state();
        if state != LifecycleState::Ready {
            return Err(LifecycleError::NotReady(state).into());
        }
        let this = core.registry.resolve(handle)?;
        let native = core
            .native
            .as_mut()
            .ok_or(LifecycleError::NotReady(state))?;
        tracing::trace!("calling {}", spec.symbol);
        let value = native.invoke(this, spec, &raw)?;
        finish(spec, value)
    }

    fn tick(&self) -> Result<TickReport, LifecycleError> {
        let guard = self.dispatcher.enter()?;
        let records = {
            let mut core = self.core.lock();
            let state = self.lifecycle.state();
            match core.native.as_mut() {
                Some(native) if state == LifecycleState::Ready => native.pump(),
                _ => return Err(LifecycleError::NotReady(state)),
            }
        };
        Ok(self.dispatcher.deliver(&guard, records))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.pump.get_mut().take() {
            task.abort();
        }
        if let Some(mut native) = self.core.get_mut().native.take() {
            tracing::debug!("bridge dropped while initialized; shutting down");
            native.shutdown();
        }
        self.dispatcher
            .pending()
            .reject_all(LifecycleError::ShutdownPending);
    }
}
