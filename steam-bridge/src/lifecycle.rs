//! Lifecycle state machine.
//!
//! `Uninitialized -> Initializing -> Ready -> ShuttingDown -> Uninitialized`.
//! The state is an atomic so `is_initialized` never waits on the native lock.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::error::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    ShuttingDown = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LifecycleState::Initializing,
            2 => LifecycleState::Ready,
            3 => LifecycleState::ShuttingDown,
            _ => LifecycleState::Uninitialized,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

/// What `initialize` should do given the state it observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InitGate {
    /// This caller won the transition to `Initializing`.
    Proceed,
    /// Already `Ready`; nothing to do.
    AlreadyReady,
}

pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(LifecycleState::from_u8)
    }

    /// Claim the `Uninitialized -> Initializing` transition.
    pub(crate) fn begin_init(&self) -> Result<InitGate, LifecycleError> {
        match self.transition(LifecycleState::Uninitialized, LifecycleState::Initializing) {
            Ok(()) => Ok(InitGate::Proceed),
            Err(LifecycleState::Ready) => Ok(InitGate::AlreadyReady),
            Err(LifecycleState::Initializing) => Err(LifecycleError::AlreadyInitializing),
            Err(other) => Err(LifecycleError::NotReady(other)),
        }
    }

    /// Finish an init claimed with [`Lifecycle::begin_init`].
    pub(crate) fn finish_init(&self, ok: bool) {
        let to = if ok {
            LifecycleState::Ready
        } else {
            LifecycleState::Uninitialized
        };
        self.state.store(to as u8, Ordering::Release);
    }

    /// Claim the `Ready -> ShuttingDown` transition.
    pub(crate) fn begin_shutdown(&self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Ready, LifecycleState::ShuttingDown)
            .map_err(LifecycleError::NotReady)
    }

    pub(crate) fn finish_shutdown(&self) {
        self.state
            .store(LifecycleState::Uninitialized as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

        assert_eq!(lifecycle.begin_init(), Ok(InitGate::Proceed));
        assert_eq!(lifecycle.state(), LifecycleState::Initializing);
        assert!(!lifecycle.is_ready());
        lifecycle.finish_init(true);
        assert!(lifecycle.is_ready());

        lifecycle.begin_shutdown().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::ShuttingDown);
        lifecycle.finish_shutdown();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

        assert_eq!(lifecycle.begin_init(), Ok(InitGate::Proceed));
    }

    #[test]
    fn concurrent_init_is_refused() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_init().unwrap();
        assert_eq!(
            lifecycle.begin_init(),
            Err(LifecycleError::AlreadyInitializing)
        );
    }

    #[test]
    fn init_when_ready_is_idempotent() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_init().unwrap();
        lifecycle.finish_init(true);
        assert_eq!(lifecycle.begin_init(), Ok(InitGate::AlreadyReady));
        assert!(lifecycle.is_ready());
    }

    #[test]
    fn failed_init_returns_to_uninitialized() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_init().unwrap();
        lifecycle.finish_init(false);
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn shutdown_requires_ready() {
        let lifecycle = Lifecycle::new();
        assert_eq!(
            lifecycle.begin_shutdown(),
            Err(LifecycleError::NotReady(LifecycleState::Uninitialized))
        );
        lifecycle.begin_init().unwrap();
        assert_eq!(
            lifecycle.begin_shutdown(),
            Err(LifecycleError::NotReady(LifecycleState::Initializing))
        );
    }

    #[test]
    fn init_during_shutdown_is_not_ready() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_init().unwrap();
        lifecycle.finish_init(true);
        lifecycle.begin_shutdown().unwrap();
        assert_eq!(
            lifecycle.begin_init(),
            Err(LifecycleError::NotReady(LifecycleState::ShuttingDown))
        );
    }
}
