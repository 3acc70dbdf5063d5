//! [`NativeApi`] over the Steamworks flat C API, loaded with `libloading`.
//!
//! Uses manual callback dispatch: the bridge owns the pump, so no native thread
//! ever calls back into host code.

use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};
use std::mem;

use crate::catalog::{FunctionSpec, ReturnKind};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, LoadError, NativeCallError};
use crate::event::{ApiCallCompleted, CallbackRecord, CallbackTag};
use crate::loader::{LibraryHandle, SymbolSpec, SymbolTable, candidate_paths};
use crate::marshal::{RawArg, from_native_string};
use crate::native::{NativeApi, NativeLoader, NativePtr, NativeValue};
use crate::registry::InterfaceKind;

type HSteamPipe = i32;
type SteamErrMsg = [c_char; 1024];

/// `CallbackMsg_t`
#[repr(C)]
#[allow(dead_code)]
struct CallbackMsg {
    user: i32,
    callback: i32,
    param: *mut u8,
    param_size: i32,
}

impl CallbackMsg {
    fn empty() -> Self {
        Self {
            user: 0,
            callback: 0,
            param: std::ptr::null_mut(),
            param_size: 0,
        }
    }
}

type InitFlatFn = unsafe extern "C" fn(*mut SteamErrMsg) -> i32;
type VoidFn = unsafe extern "C" fn();
type GetPipeFn = unsafe extern "C" fn() -> HSteamPipe;
type RunFrameFn = unsafe extern "C" fn(HSteamPipe);
type GetNextCallbackFn = unsafe extern "C" fn(HSteamPipe, *mut CallbackMsg) -> bool;
type GetApiCallResultFn =
    unsafe extern "C" fn(HSteamPipe, u64, *mut c_void, i32, i32, *mut bool) -> bool;
type AccessorFn = unsafe extern "C" fn() -> *mut c_void;

const INIT_FLAT: &str = "SteamAPI_InitFlat";
const SHUTDOWN: &str = "SteamAPI_Shutdown";
const GET_PIPE: &str = "SteamAPI_GetHSteamPipe";
const DISPATCH_INIT: &str = "SteamAPI_ManualDispatch_Init";
const RUN_FRAME: &str = "SteamAPI_ManualDispatch_RunFrame";
const GET_NEXT_CALLBACK: &str = "SteamAPI_ManualDispatch_GetNextCallback";
const FREE_LAST_CALLBACK: &str = "SteamAPI_ManualDispatch_FreeLastCallback";
const GET_API_CALL_RESULT: &str = "SteamAPI_ManualDispatch_GetAPICallResult";

/// Largest call result fetched from the SDK. Result structs are a few hundred bytes.
const MAX_CALL_RESULT: u32 = 64 * 1024;

/// Variables the SDK reads the app id from.
const APP_ID_VARS: [&str; 2] = ["SteamAppId", "SteamGameId"];

/// A zeroed buffer for a call result, with its length as the SDK takes it.
fn result_buffer(size: u32) -> Option<(Vec<u8>, i32)> {
    if size > MAX_CALL_RESULT {
        return None;
    }
    let len = i32::try_from(size).ok()?;
    Some((vec![0u8; len as usize], len))
}

/// App id variables that do not already hold `app_id`.
fn app_id_exports(app_id: u32, read: impl Fn(&str) -> Option<String>) -> Vec<(&'static str, String)> {
    let value = app_id.to_string();
    APP_ID_VARS
        .into_iter()
        .filter(|name| read(name).as_deref() != Some(value.as_str()))
        .map(|name| (name, value.clone()))
        .collect()
}

/// Everything that must resolve for a load to succeed.
pub fn required_symbols() -> SymbolTable {
    let mut table = SymbolTable::new([
        SymbolSpec::new(INIT_FLAT, "ESteamAPIInitResult (*)(SteamErrMsg*)"),
        SymbolSpec::new(SHUTDOWN, "void (*)(void)"),
        SymbolSpec::new(GET_PIPE, "HSteamPipe (*)(void)"),
        SymbolSpec::new(DISPATCH_INIT, "void (*)(void)"),
        SymbolSpec::new(RUN_FRAME, "void (*)(HSteamPipe)"),
        SymbolSpec::new(GET_NEXT_CALLBACK, "bool (*)(HSteamPipe, CallbackMsg_t*)"),
        SymbolSpec::new(FREE_LAST_CALLBACK, "void (*)(HSteamPipe)"),
        SymbolSpec::new(
            GET_API_CALL_RESULT,
            "bool (*)(HSteamPipe, SteamAPICall_t, void*, int, int, bool*)",
        ),
    ]);
    table.required.extend(
        InterfaceKind::ALL
            .into_iter()
            .map(|kind| SymbolSpec::new(kind.accessor_symbol(), "ISteam* (*)(void)")),
    );
    table
}

/// Loads the Steamworks library named by a [`BridgeConfig`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SteamLoader;

impl NativeLoader for SteamLoader {
    fn load(&self, config: &BridgeConfig) -> Result<Box<dyn NativeApi>, LoadError> {
        let mut table = required_symbols();
        if let (Some(symbol), Some(minimum)) = (&config.version_symbol, config.minimum_version) {
            table = table.with_version(symbol.clone(), minimum);
        }
        let candidates = candidate_paths(config.library_path.as_deref());
        let library = LibraryHandle::load(&candidates, &table)?;
        Ok(Box::new(SteamNative::new(library)?))
    }
}

struct CoreFns {
    init_flat: InitFlatFn,
    shutdown: VoidFn,
    get_pipe: GetPipeFn,
    dispatch_init: VoidFn,
    run_frame: RunFrameFn,
    get_next_callback: GetNextCallbackFn,
    free_last_callback: RunFrameFn,
    get_api_call_result: GetApiCallResultFn,
}

/// A loaded Steamworks library.
///
/// `library` is declared last so every function pointer is dropped before the
/// module is unloaded.
pub struct SteamNative {
    core: CoreFns,
    accessors: HashMap<InterfaceKind, AccessorFn>,
    pipe: Option<HSteamPipe>,
    library: LibraryHandle,
}

// Safety: every call goes through `&mut self`, and the bridge holds its native
// lock for the duration.
unsafe impl Send for SteamNative {}

/// Reinterpret a resolved address as the function type it was declared with.
///
/// # Safety
/// `F` must be an `extern "C"` function pointer type matching the export.
unsafe fn cast<F: Copy>(library: &LibraryHandle, name: &str) -> Result<F, LoadError> {
    debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*const c_void>());
    let entry = library
        .symbol(name)
        .ok_or_else(|| LoadError::MissingSymbol(name.to_string()))?;
    let address = entry.address();
    Ok(unsafe { mem::transmute_copy::<*const c_void, F>(&address) })
}

impl SteamNative {
    fn new(library: LibraryHandle) -> Result<Self, LoadError> {
        // Safety: the aliases above mirror steam_api_flat.h.
        let core = unsafe {
            CoreFns {
                init_flat: cast(&library, INIT_FLAT)?,
                shutdown: cast(&library, SHUTDOWN)?,
                get_pipe: cast(&library, GET_PIPE)?,
                dispatch_init: cast(&library, DISPATCH_INIT)?,
                run_frame: cast(&library, RUN_FRAME)?,
                get_next_callback: cast(&library, GET_NEXT_CALLBACK)?,
                free_last_callback: cast(&library, FREE_LAST_CALLBACK)?,
                get_api_call_result: cast(&library, GET_API_CALL_RESULT)?,
            }
        };
        let mut accessors = HashMap::new();
        for kind in InterfaceKind::ALL {
            let accessor: AccessorFn = unsafe { cast(&library, kind.accessor_symbol())? };
            accessors.insert(kind, accessor);
        }
        Ok(Self {
            core,
            accessors,
            pipe: None,
            library,
        })
    }

    /// Fetch the result announced by a `SteamAPICallCompleted_t` record.
    fn call_result(&self, pipe: HSteamPipe, record: &CallbackRecord) -> Option<CallbackRecord> {
        let header = match ApiCallCompleted::parse(record) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("dropping malformed call completion: {e}");
                return None;
            }
        };
        let Some((mut buffer, len)) = result_buffer(header.result_size) else {
            tracing::warn!(
                call = header.call,
                size = header.result_size,
                "call result too large; failing the call"
            );
            return Some(CallbackRecord::call_result(
                header.call,
                header.result_tag,
                Vec::new(),
                true,
            ));
        };
        let mut failed = false;
        let ok = unsafe {
            (self.core.get_api_call_result)(
                pipe,
                header.call,
                buffer.as_mut_ptr().cast(),
                len,
                header.result_tag.0,
                &mut failed,
            )
        };
        if !ok {
            tracing::debug!("result for call {} could not be fetched", header.call);
            return Some(CallbackRecord::call_result(
                header.call,
                header.result_tag,
                Vec::new(),
                true,
            ));
        }
        Some(CallbackRecord::call_result(
            header.call,
            header.result_tag,
            buffer,
            failed,
        ))
    }
}

impl NativeApi for SteamNative {
    fn init(&mut self, app_id: Option<u32>) -> Result<(), LoadError> {
        if let Some(app_id) = app_id {
            for (name, value) in app_id_exports(app_id, |name| std::env::var(name).ok()) {
                tracing::debug!("exporting {name}={value}");
                // Safety: sound only while no other thread reads or writes the
                // environment. Multi-threaded hosts export the app id before
                // spawning threads, which leaves nothing to set here.
                unsafe { std::env::set_var(name, value) };
            }
        }

        let mut message: SteamErrMsg = [0; 1024];
        let code = unsafe { (self.core.init_flat)(&mut message) };
        if code != 0 {
            let message = unsafe { CStr::from_ptr(message.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            return Err(LoadError::InitFailed { code, message });
        }

        unsafe { (self.core.dispatch_init)() };
        let pipe = unsafe { (self.core.get_pipe)() };
        tracing::debug!("manual dispatch enabled on pipe {pipe}");
        self.pipe = Some(pipe);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.pipe.take().is_some() {
            unsafe { (self.core.shutdown)() };
        }
    }

    fn interface(&mut self, kind: InterfaceKind) -> Option<NativePtr> {
        self.pipe?;
        let accessor = self.accessors.get(&kind)?;
        NativePtr::new(unsafe { accessor() })
    }

    fn pump(&mut self) -> Vec<CallbackRecord> {
        let Some(pipe) = self.pipe else {
            return Vec::new();
        };
        unsafe { (self.core.run_frame)(pipe) };

        let mut records = Vec::new();
        let mut msg = CallbackMsg::empty();
        while unsafe { (self.core.get_next_callback)(pipe, &mut msg) } {
            let payload = if msg.param.is_null() || msg.param_size <= 0 {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(msg.param, msg.param_size as usize) }.to_vec()
            };
            let record = CallbackRecord::new(CallbackTag(msg.callback), payload);
            if record.tag == CallbackTag::API_CALL_COMPLETED {
                records.extend(self.call_result(pipe, &record));
            } else {
                records.push(record);
            }
            unsafe { (self.core.free_last_callback)(pipe) };
        }
        records
    }

    fn invoke(
        &mut self,
        this: NativePtr,
        function: &FunctionSpec,
        args: &[RawArg],
    ) -> Result<NativeValue, BridgeError> {
        let address = self
            .library
            .optional(function.symbol)
            .ok_or_else(|| NativeCallError::MissingFunction(function.symbol.to_string()))?;
        let raw = unsafe { call_shape(address, this.as_ptr(), function, args)? };
        let value = match (raw, function.ret) {
            (Ret::Void, _) => NativeValue::Void,
            (Ret::Bool(b), _) => NativeValue::Bool(b),
            (Ret::I32(v), _) => NativeValue::I32(v),
            (Ret::U32(v), _) => NativeValue::U32(v),
            (Ret::U64(v), ReturnKind::ApiCall(_)) => NativeValue::ApiCall(v),
            (Ret::U64(v), _) => NativeValue::U64(v),
            (Ret::Str(ptr), _) => NativeValue::Str(unsafe { from_native_string(ptr)? }),
        };
        Ok(value)
    }
}

/// Native return in its raw register form.
enum Ret {
    Void,
    Bool(bool),
    I32(i32),
    U32(u32),
    U64(u64),
    Str(*const c_char),
}

/// Cast `$addr` to `fn(this, args...) -> ret` for the declared return kind and call it.
macro_rules! native_call {
    ($addr:expr, $ret:expr, $this:expr $(, $arg:expr => $ty:ty)*) => {{
        let addr: *const c_void = $addr;
        match $ret {
            ReturnKind::Void => {
                let f: unsafe extern "C" fn(*mut c_void $(, $ty)*) = mem::transmute(addr);
                f($this $(, $arg)*);
                Ret::Void
            }
            ReturnKind::Bool => {
                let f: unsafe extern "C" fn(*mut c_void $(, $ty)*) -> bool = mem::transmute(addr);
                Ret::Bool(f($this $(, $arg)*))
            }
            ReturnKind::I32 => {
                let f: unsafe extern "C" fn(*mut c_void $(, $ty)*) -> i32 = mem::transmute(addr);
                Ret::I32(f($this $(, $arg)*))
            }
            ReturnKind::U32 => {
                let f: unsafe extern "C" fn(*mut c_void $(, $ty)*) -> u32 = mem::transmute(addr);
                Ret::U32(f($this $(, $arg)*))
            }
            ReturnKind::U64 | ReturnKind::ApiCall(_) => {
                let f: unsafe extern "C" fn(*mut c_void $(, $ty)*) -> u64 = mem::transmute(addr);
                Ret::U64(f($this $(, $arg)*))
            }
            ReturnKind::Str => {
                let f: unsafe extern "C" fn(*mut c_void $(, $ty)*) -> *const c_char =
                    mem::transmute(addr);
                Ret::Str(f($this $(, $arg)*))
            }
        }
    }};
}

/// Dispatch on the lowered argument shape.
///
/// # Safety
/// `address` must be the export named by `function`, and `args` must have been
/// lowered against `function.params`.
unsafe fn call_shape(
    address: *const c_void,
    this: *mut c_void,
    function: &FunctionSpec,
    args: &[RawArg],
) -> Result<Ret, NativeCallError> {
    use RawArg as A;
    let ret = function.ret;
    let raw = unsafe {
        match *args {
            [] => native_call!(address, ret, this),
            [A::Bool(a)] => native_call!(address, ret, this, a => bool),
            [A::I32(a)] => native_call!(address, ret, this, a => i32),
            [A::U32(a)] => native_call!(address, ret, this, a => u32),
            [A::U64(a)] => native_call!(address, ret, this, a => u64),
            [A::Str(a)] => native_call!(address, ret, this, a => *const c_char),
            [A::Str(a), A::Str(b)] => {
                native_call!(address, ret, this, a => *const c_char, b => *const c_char)
            }
            [A::Str(a), A::U64(b)] => native_call!(address, ret, this, a => *const c_char, b => u64),
            [A::Str(a), A::I32(b)] => native_call!(address, ret, this, a => *const c_char, b => i32),
            [A::U32(a), A::I32(b)] => native_call!(address, ret, this, a => u32, b => i32),
            [A::I32(a), A::I32(b)] => native_call!(address, ret, this, a => i32, b => i32),
            [A::U64(a), A::I32(b)] => native_call!(address, ret, this, a => u64, b => i32),
            _ => return Err(NativeCallError::UnsupportedSignature(function.symbol.to_string())),
        }
    };
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_table_covers_dispatch_and_accessors() {
        let table = required_symbols();
        let names: Vec<_> = table.required.iter().map(|s| s.name).collect();
        for name in [INIT_FLAT, RUN_FRAME, GET_NEXT_CALLBACK, GET_API_CALL_RESULT] {
            assert!(names.contains(&name), "{name} not required");
        }
        for kind in InterfaceKind::ALL {
            assert!(names.contains(&kind.accessor_symbol()));
        }
        assert!(table.version.is_none());
    }

    #[test]
    fn callback_msg_matches_native_layout() {
        assert_eq!(mem::offset_of!(CallbackMsg, callback), 4);
        assert_eq!(mem::offset_of!(CallbackMsg, param), 8);
        assert_eq!(
            mem::size_of::<CallbackMsg>(),
            if cfg!(target_pointer_width = "64") { 24 } else { 16 }
        );
    }

    extern "C" fn fake_add(this: *mut c_void, a: u32, b: i32) -> i32 {
        this as usize as i32 + a as i32 + b
    }

    extern "C" fn fake_name(_this: *mut c_void) -> *const c_char {
        c"Gabe".as_ptr()
    }

    #[test]
    fn calls_through_signature_shapes() {
        let spec = FunctionSpec {
            interface: InterfaceKind::Utils,
            name: "Add",
            symbol: "fake_add",
            params: &[],
            ret: ReturnKind::I32,
        };
        let ret = unsafe {
            call_shape(
                fake_add as *const c_void,
                10usize as *mut c_void,
                &spec,
                &[RawArg::U32(5), RawArg::I32(-2)],
            )
        }
        .unwrap();
        assert!(matches!(ret, Ret::I32(13)));

        let spec = FunctionSpec {
            ret: ReturnKind::Str,
            ..spec
        };
        let ret = unsafe {
            call_shape(fake_name as *const c_void, std::ptr::null_mut(), &spec, &[])
        }
        .unwrap();
        let Ret::Str(ptr) = ret else {
            panic!("expected a string return");
        };
        assert_eq!(unsafe { from_native_string(ptr) }.unwrap(), "Gabe");
    }

    #[test]
    fn call_result_buffers_are_bounded() {
        let (buffer, len) = result_buffer(8).unwrap();
        assert_eq!((buffer.len(), len), (8, 8));
        assert_eq!(result_buffer(0).unwrap().1, 0);
        assert!(result_buffer(MAX_CALL_RESULT).is_some());
        assert!(result_buffer(MAX_CALL_RESULT + 1).is_none());
        assert!(result_buffer(u32::MAX).is_none());
    }

    #[test]
    fn app_id_already_exported_is_left_alone() {
        let exported = |_: &str| Some("480".to_string());
        assert!(app_id_exports(480, exported).is_empty());

        let partial = |name: &str| (name == "SteamAppId").then(|| "480".to_string());
        assert_eq!(
            app_id_exports(480, partial),
            vec![("SteamGameId", "480".to_string())]
        );

        let stale = |_: &str| Some("570".to_string());
        assert_eq!(app_id_exports(480, stale).len(), 2);
        assert_eq!(app_id_exports(480, |_| None).len(), 2);
    }

    #[test]
    fn unknown_shape_is_rejected_before_calling() {
        let spec = FunctionSpec {
            interface: InterfaceKind::Friends,
            name: "Odd",
            symbol: "SteamAPI_ISteamFriends_Odd",
            params: &[],
            ret: ReturnKind::Void,
        };
        let err = unsafe {
            call_shape(
                std::ptr::null(),
                std::ptr::null_mut(),
                &spec,
                &[RawArg::Bool(true), RawArg::Bool(false)],
            )
        };
        assert!(matches!(err, Err(NativeCallError::UnsupportedSignature(_))));
    }
}
