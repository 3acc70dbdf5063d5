//! Error taxonomy for the bridge.
//!
//! Feature managers turn every one of these into "log and return"; the core keeps
//! them precise so callers and tests can tell failure causes apart.

use std::path::PathBuf;

use crate::event::CallbackTag;
use crate::lifecycle::LifecycleState;
use crate::registry::InterfaceKind;

/// Failures while locating, opening or validating the native library.
///
/// Fatal to `initialize`; no partial state is retained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("native library not found (searched {searched:?})")]
    NotFound { searched: Vec<PathBuf> },
    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },
    #[error("required symbol `{0}` is missing")]
    MissingSymbol(String),
    #[error("native library reports version {found}, need at least {minimum}")]
    UnsupportedVersion { found: u32, minimum: u32 },
    #[error("native init failed with code {code}: {message}")]
    InitFailed { code: i32, message: String },
}

/// Calls made in the wrong lifecycle state, or with handles from a past epoch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("bridge is not ready (state: {0:?})")]
    NotReady(LifecycleState),
    #[error("initialization already in progress")]
    AlreadyInitializing,
    #[error("bridge shut down before the call completed")]
    ShutdownPending,
    #[error("interface handle from epoch {handle} used in epoch {current}")]
    StaleHandle { handle: u64, current: u64 },
    #[error("interface {0:?} is not available")]
    InterfaceUnavailable(InterfaceKind),
    #[error("callback dispatch is already running")]
    ReentrantDispatch,
    #[error("no tokio runtime to drive the callback pump")]
    NoRuntime,
}

/// Host values that cannot cross the native boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    #[error("invalid 64-bit identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("string cannot be encoded for native code: {0}")]
    EncodingError(String),
    #[error("unknown {kind} variant: {value:?}")]
    UnknownVariant { kind: &'static str, value: String },
    #[error("native code returned a null pointer")]
    NullPointer,
    #[error("argument {index}: expected {expected}, got {got}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        got: &'static str,
    },
    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
}

/// Failures of a specific native call or of a specific callback record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeCallError {
    #[error("{interface:?} has no function named {function}")]
    UnknownFunction {
        interface: InterfaceKind,
        function: String,
    },
    #[error("native library does not export `{0}`")]
    MissingFunction(String),
    #[error("no call shape for `{0}`")]
    UnsupportedSignature(String),
    #[error("`{0}` does not complete asynchronously")]
    NotAsync(&'static str),
    #[error("`{0}` returned an invalid async call handle")]
    InvalidApiCall(&'static str),
    #[error("async call {0} failed")]
    AsyncCallFailed(u64),
    #[error("async call {id} completed with {got}, expected {expected}")]
    UnexpectedResult {
        id: u64,
        expected: CallbackTag,
        got: CallbackTag,
    },
    #[error("async call {0} timed out")]
    TimedOut(u64),
    #[error("cannot decode callback {tag}: {reason}")]
    Decode { tag: CallbackTag, reason: String },
    #[error("unrecognized callback {0}")]
    UnknownCallback(CallbackTag),
}

/// Any failure surfaced by [`crate::Bridge`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Native(#[from] NativeCallError),
}

/// Configuration file problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
