//! The native library boundary.
//!
//! [`NativeApi`] is everything the bridge needs from a loaded SDK: init and
//! shutdown, interface accessors, the callback pump and calls to catalogued entry
//! points. [`steam::SteamLoader`] provides it over the real shared library; tests
//! provide scripted implementations.

pub mod steam;

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::catalog::FunctionSpec;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, LoadError};
use crate::event::CallbackRecord;
use crate::marshal::{RawArg, from_native64};
use crate::registry::InterfaceKind;

/// Opaque, non-null native pointer. Never dereferenced on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativePtr(NonNull<c_void>);

// Safety: the pointer is an opaque token handed back to the native library
// verbatim, and only while the bridge's native lock is held.
unsafe impl Send for NativePtr {}
unsafe impl Sync for NativePtr {}

impl NativePtr {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// A native return value, already copied into host memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeValue {
    Void,
    Bool(bool),
    I32(i32),
    U32(u32),
    U64(u64),
    Str(String),
    ApiCall(u64),
}

impl NativeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// A 64-bit return as decimal identifier text.
    pub fn as_id(&self) -> Option<String> {
        match self {
            NativeValue::U64(v) => Some(from_native64(*v)),
            _ => None,
        }
    }
}

/// A loaded and resolved native library.
///
/// Dropping the value unloads the library; the bridge only does so after
/// [`NativeApi::shutdown`] and with no call in flight.
pub trait NativeApi: Send {
    /// Initialize the SDK and enable manual callback dispatch.
    fn init(&mut self, app_id: Option<u32>) -> Result<(), LoadError>;

    fn shutdown(&mut self);

    /// Query an interface accessor. `None` for a null pointer.
    fn interface(&mut self, kind: InterfaceKind) -> Option<NativePtr>;

    /// Drain every currently queued callback, in native order.
    fn pump(&mut self) -> Vec<CallbackRecord>;

    /// Call a catalogued entry point on interface `this` with lowered arguments.
    fn invoke(
        &mut self,
        this: NativePtr,
        function: &FunctionSpec,
        args: &[RawArg],
    ) -> Result<NativeValue, BridgeError>;
}

/// Opens the native library for a given configuration.
pub trait NativeLoader: Send + Sync {
    fn load(&self, config: &BridgeConfig) -> Result<Box<dyn NativeApi>, LoadError>;
}
