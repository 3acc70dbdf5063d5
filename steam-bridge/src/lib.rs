//! Typed bridge over the Steamworks flat C API.
//!
//! Loads the platform SDK library, marshals values across the C boundary, tracks
//! the init/shutdown lifecycle and interface validity, and pumps the native
//! callback queue into host listeners and awaitable call results.
//!
//! ```no_run
//! use steam_bridge::{Bridge, BridgeConfig, CallbackTag};
//!
//! # async fn run() -> Result<(), steam_bridge::BridgeError> {
//! let bridge = Bridge::steam();
//! bridge.initialize(&BridgeConfig::with_app_id("480"))?;
//! bridge.on_callback(CallbackTag::GAME_OVERLAY_ACTIVATED, |event| println!("{event:?}"));
//! bridge.spawn_pump(std::time::Duration::from_millis(16))?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod loader;
pub mod marshal;
pub mod native;
pub mod overlay;
pub mod registry;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use dispatch::{CallFuture, RegistrationHandle, TickReport};
pub use error::{BridgeError, ConfigError, LifecycleError, LoadError, MarshalError, NativeCallError};
pub use event::{CallbackEvent, CallbackRecord, CallbackTag};
pub use lifecycle::LifecycleState;
pub use marshal::Arg;
pub use native::{NativeApi, NativeLoader, NativePtr, NativeValue};
pub use overlay::OverlayManager;
pub use registry::{Epoch, InterfaceHandle, InterfaceKind};
