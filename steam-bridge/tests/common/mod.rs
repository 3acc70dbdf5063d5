//! Scripted stand-in for the native SDK library.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use steam_bridge::catalog::{FunctionSpec, ReturnKind};
use steam_bridge::marshal::{RawArg, from_native_string};
use steam_bridge::{
    BridgeConfig, BridgeError, CallbackRecord, CallbackTag, InterfaceKind, LoadError, NativeApi,
    NativeLoader, NativePtr, NativeValue,
};

/// An argument as the native side received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Bool(bool),
    I32(i32),
    U32(u32),
    U64(u64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub symbol: &'static str,
    pub this: usize,
    pub args: Vec<Seen>,
}

#[derive(Default)]
pub struct FakeState {
    pub fail_load: Option<LoadError>,
    pub fail_init: Option<LoadError>,
    pub null_interfaces: HashSet<InterfaceKind>,
    pub returns: HashMap<&'static str, NativeValue>,
    /// Payloads used to complete async calls automatically on the next pump.
    pub results: HashMap<CallbackTag, Vec<u8>>,
    pub batches: VecDeque<Vec<CallbackRecord>>,
    pub calls: Vec<Invocation>,
    pub interface_queries: HashMap<InterfaceKind, usize>,
    pub issued: Vec<u64>,
    pub next_call: u64,
    pub app_ids: Vec<Option<u32>>,
    pub loads: usize,
    pub unloads: usize,
    pub shutdowns: usize,
    pub pumps: usize,
    pub live: bool,
}

/// Loader handing out [`FakeNative`] instances that share one script.
#[derive(Clone, Default)]
pub struct Fake {
    pub state: Arc<Mutex<FakeState>>,
}

impl Fake {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.state.lock().next_call = 1000;
        fake
    }

    pub fn push(&self, batch: Vec<CallbackRecord>) {
        self.state.lock().batches.push_back(batch);
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.state.lock().calls.clone()
    }

    pub fn symbols(&self) -> Vec<&'static str> {
        self.state.lock().calls.iter().map(|c| c.symbol).collect()
    }

    pub fn queries(&self, kind: InterfaceKind) -> usize {
        self.state
            .lock()
            .interface_queries
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn returns(&self, symbol: &'static str, value: NativeValue) {
        self.state.lock().returns.insert(symbol, value);
    }

    pub fn complete_with(&self, tag: CallbackTag, payload: Vec<u8>) {
        self.state.lock().results.insert(tag, payload);
    }
}

impl NativeLoader for Fake {
    fn load(&self, _config: &BridgeConfig) -> Result<Box<dyn NativeApi>, LoadError> {
        let mut state = self.state.lock();
        if let Some(e) = state.fail_load.take() {
            return Err(e);
        }
        state.loads += 1;
        state.live = true;
        Ok(Box::new(FakeNative {
            state: self.state.clone(),
            initialized: false,
        }))
    }
}

pub struct FakeNative {
    state: Arc<Mutex<FakeState>>,
    initialized: bool,
}

impl Drop for FakeNative {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.unloads += 1;
        state.live = false;
    }
}

fn fake_interface(kind: InterfaceKind) -> Option<NativePtr> {
    NativePtr::new((0x1000 + kind as usize * 0x100) as *mut std::ffi::c_void)
}

impl NativeApi for FakeNative {
    fn init(&mut self, app_id: Option<u32>) -> Result<(), LoadError> {
        let mut state = self.state.lock();
        state.app_ids.push(app_id);
        if let Some(e) = state.fail_init.take() {
            return Err(e);
        }
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        assert!(self.initialized, "shutdown before init");
        self.initialized = false;
        self.state.lock().shutdowns += 1;
    }

    fn interface(&mut self, kind: InterfaceKind) -> Option<NativePtr> {
        assert!(self.initialized, "interface queried before init");
        let mut state = self.state.lock();
        *state.interface_queries.entry(kind).or_default() += 1;
        if state.null_interfaces.contains(&kind) {
            None
        } else {
            fake_interface(kind)
        }
    }

    fn pump(&mut self) -> Vec<CallbackRecord> {
        assert!(self.initialized, "pump before init");
        let mut state = self.state.lock();
        state.pumps += 1;
        state.batches.pop_front().unwrap_or_default()
    }

    fn invoke(
        &mut self,
        this: NativePtr,
        function: &FunctionSpec,
        args: &[RawArg],
    ) -> Result<NativeValue, BridgeError> {
        assert!(self.initialized, "call before init");
        let seen = args
            .iter()
            .map(|arg| match *arg {
                RawArg::Bool(v) => Seen::Bool(v),
                RawArg::I32(v) => Seen::I32(v),
                RawArg::U32(v) => Seen::U32(v),
                RawArg::U64(v) => Seen::U64(v),
                RawArg::Str(ptr) => Seen::Str(unsafe { from_native_string(ptr) }.unwrap()),
            })
            .collect();

        let mut state = self.state.lock();
        state.calls.push(Invocation {
            symbol: function.symbol,
            this: this.addr(),
            args: seen,
        });
        if let Some(value) = state.returns.get(function.symbol) {
            return Ok(value.clone());
        }
        let value = match function.ret {
            ReturnKind::Void => NativeValue::Void,
            ReturnKind::Bool => NativeValue::Bool(true),
            ReturnKind::I32 => NativeValue::I32(0),
            ReturnKind::U32 => NativeValue::U32(480),
            ReturnKind::U64 => NativeValue::U64(76561197960287930),
            ReturnKind::Str => NativeValue::Str("fake".to_string()),
            ReturnKind::ApiCall(tag) => {
                let id = state.next_call;
                state.next_call += 1;
                state.issued.push(id);
                if let Some(payload) = state.results.get(&tag).cloned() {
                    state
                        .batches
                        .push_back(vec![CallbackRecord::call_result(id, tag, payload, false)]);
                }
                NativeValue::ApiCall(id)
            }
        };
        Ok(value)
    }
}

pub fn overlay_activated(active: bool) -> CallbackRecord {
    let mut payload = vec![active as u8, 1, 0, 0];
    payload.extend_from_slice(&480u32.to_le_bytes());
    CallbackRecord::new(CallbackTag::GAME_OVERLAY_ACTIVATED, payload)
}

pub fn low_battery(minutes: u8) -> CallbackRecord {
    CallbackRecord::new(CallbackTag::LOW_BATTERY_POWER, vec![minutes])
}

pub fn players_payload(players: i32) -> Vec<u8> {
    let mut payload = vec![1u8, 0, 0, 0];
    payload.extend_from_slice(&players.to_le_bytes());
    payload
}

pub fn ready(fake: &Fake) -> steam_bridge::Bridge {
    let bridge = steam_bridge::Bridge::new(fake.clone());
    bridge
        .initialize(&BridgeConfig::with_app_id("480"))
        .expect("fake init");
    bridge
}
