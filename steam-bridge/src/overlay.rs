//! Overlay manager.
//!
//! Thin pass-through over [`Bridge`]: check initialization, fetch the Friends
//! interface, marshal, call. Every failure is logged and swallowed; the latest
//! one is visible through [`Bridge::last_error`].

use std::str::FromStr;

use parking_lot::Mutex;

use crate::bridge::Bridge;
use crate::dispatch::RegistrationHandle;
use crate::error::MarshalError;
use crate::event::{CallbackEvent, CallbackTag};
use crate::marshal::{Arg, DialogArg, DialogName, NativeEnum, parse_enum};
use crate::registry::{InterfaceHandle, InterfaceKind};

/// Dialogs for `ActivateGameOverlay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayDialog {
    Friends,
    Community,
    Players,
    Settings,
    OfficialGameGroup,
    Stats,
    Achievements,
}

impl DialogName for OverlayDialog {
    const KIND: &'static str = "overlay dialog";

    fn all() -> &'static [Self] {
        &[
            OverlayDialog::Friends,
            OverlayDialog::Community,
            OverlayDialog::Players,
            OverlayDialog::Settings,
            OverlayDialog::OfficialGameGroup,
            OverlayDialog::Stats,
            OverlayDialog::Achievements,
        ]
    }

    fn name(self) -> &'static str {
        match self {
            OverlayDialog::Friends => "friends",
            OverlayDialog::Community => "community",
            OverlayDialog::Players => "players",
            OverlayDialog::Settings => "settings",
            OverlayDialog::OfficialGameGroup => "officialgamegroup",
            OverlayDialog::Stats => "stats",
            OverlayDialog::Achievements => "achievements",
        }
    }
}

impl From<OverlayDialog> for DialogArg<OverlayDialog> {
    fn from(dialog: OverlayDialog) -> Self {
        DialogArg::Known(dialog)
    }
}

/// Dialogs for `ActivateGameOverlayToUser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDialog {
    SteamId,
    Chat,
    JoinTrade,
    Stats,
    Achievements,
    FriendAdd,
    FriendRemove,
    FriendRequestAccept,
    FriendRequestIgnore,
}

impl DialogName for UserDialog {
    const KIND: &'static str = "user dialog";

    fn all() -> &'static [Self] {
        &[
            UserDialog::SteamId,
            UserDialog::Chat,
            UserDialog::JoinTrade,
            UserDialog::Stats,
            UserDialog::Achievements,
            UserDialog::FriendAdd,
            UserDialog::FriendRemove,
            UserDialog::FriendRequestAccept,
            UserDialog::FriendRequestIgnore,
        ]
    }

    fn name(self) -> &'static str {
        match self {
            UserDialog::SteamId => "steamid",
            UserDialog::Chat => "chat",
            UserDialog::JoinTrade => "jointrade",
            UserDialog::Stats => "stats",
            UserDialog::Achievements => "achievements",
            UserDialog::FriendAdd => "friendadd",
            UserDialog::FriendRemove => "friendremove",
            UserDialog::FriendRequestAccept => "friendrequestaccept",
            UserDialog::FriendRequestIgnore => "friendrequestignore",
        }
    }
}

impl From<UserDialog> for DialogArg<UserDialog> {
    fn from(dialog: UserDialog) -> Self {
        DialogArg::Known(dialog)
    }
}

/// `EActivateGameOverlayToWebPageMode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebPageMode {
    #[default]
    Default,
    Modal,
}

impl NativeEnum for WebPageMode {
    const KIND: &'static str = "web page mode";

    fn variants() -> &'static [(&'static str, Self)] {
        &[("Default", WebPageMode::Default), ("Modal", WebPageMode::Modal)]
    }

    fn code(self) -> i32 {
        match self {
            WebPageMode::Default => 0,
            WebPageMode::Modal => 1,
        }
    }
}

impl FromStr for WebPageMode {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_enum(s)
    }
}

/// `EOverlayToStoreFlag`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreFlag {
    #[default]
    None,
    AddToCart,
    AddToCartAndShow,
}

impl NativeEnum for StoreFlag {
    const KIND: &'static str = "store flag";

    fn variants() -> &'static [(&'static str, Self)] {
        &[
            ("None", StoreFlag::None),
            ("AddToCart", StoreFlag::AddToCart),
            ("AddToCartAndShow", StoreFlag::AddToCartAndShow),
        ]
    }

    fn code(self) -> i32 {
        match self {
            StoreFlag::None => 0,
            StoreFlag::AddToCart => 1,
            StoreFlag::AddToCartAndShow => 2,
        }
    }
}

impl FromStr for StoreFlag {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_enum(s)
    }
}

pub struct OverlayManager {
    bridge: Bridge,
    friends: Mutex<Option<InterfaceHandle>>,
}

impl OverlayManager {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            bridge,
            friends: Mutex::new(None),
        }
    }

    /// Friends interface for the current epoch, refreshed after a re-init.
    fn friends(&self) -> Option<InterfaceHandle> {
        if !self.bridge.is_initialized() {
            tracing::warn!("overlay: native library not initialized");
            return None;
        }
        let mut cached = self.friends.lock();
        let epoch = self.bridge.epoch();
        if let Some(handle) = cached.filter(|h| h.epoch() == epoch) {
            return Some(handle);
        }
        *cached = self.bridge.interface(InterfaceKind::Friends);
        if cached.is_none() {
            tracing::warn!("overlay: Friends interface unavailable");
        }
        *cached
    }

    fn dialog<D: DialogName>(&self, dialog: DialogArg<D>) -> Option<&'static str> {
        match dialog.resolve() {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!("overlay: {e}");
                self.bridge.record_error(e);
                None
            }
        }
    }

    pub fn activate(&self, dialog: impl Into<DialogArg<OverlayDialog>>) {
        let Some(friends) = self.friends() else { return };
        let Some(name) = self.dialog(dialog.into()) else { return };
        self.bridge
            .call_void(friends, "ActivateGameOverlay", &[Arg::str(name)]);
    }

    /// Open a user-scoped dialog. `steam_id` is decimal text.
    pub fn activate_to_user(&self, dialog: impl Into<DialogArg<UserDialog>>, steam_id: &str) {
        let Some(friends) = self.friends() else { return };
        let Some(name) = self.dialog(dialog.into()) else { return };
        self.bridge.call_void(
            friends,
            "ActivateGameOverlayToUser",
            &[Arg::str(name), Arg::id(steam_id)],
        );
    }

    pub fn activate_to_web_page(&self, url: &str, mode: WebPageMode) {
        let Some(friends) = self.friends() else { return };
        self.bridge.call_void(
            friends,
            "ActivateGameOverlayToWebPage",
            &[Arg::str(url), Arg::enumeration(mode)],
        );
    }

    pub fn activate_to_store(&self, app_id: u32, flag: StoreFlag) {
        let Some(friends) = self.friends() else { return };
        self.bridge.call_void(
            friends,
            "ActivateGameOverlayToStore",
            &[Arg::from(app_id), Arg::enumeration(flag)],
        );
    }

    /// Invite dialog for a lobby. `lobby_id` is decimal text.
    pub fn activate_invite_dialog(&self, lobby_id: &str) {
        let Some(friends) = self.friends() else { return };
        self.bridge.call_void(
            friends,
            "ActivateGameOverlayInviteDialog",
            &[Arg::id(lobby_id)],
        );
    }

    /// Whether the overlay can be shown. `false` on any failure.
    pub fn is_enabled(&self) -> bool {
        if !self.bridge.is_initialized() {
            tracing::warn!("overlay: native library not initialized");
            return false;
        }
        let Some(utils) = self.bridge.interface(InterfaceKind::Utils) else {
            return false;
        };
        match self.bridge.try_call(utils, "IsOverlayEnabled", &[]) {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                tracing::warn!("overlay: IsOverlayEnabled failed: {e}");
                false
            }
        }
    }

    /// Called with `true` when the overlay opens and `false` when it closes.
    pub fn on_activated(
        &self,
        handler: impl Fn(bool) + Send + Sync + 'static,
    ) -> RegistrationHandle {
        self.bridge
            .on_callback(CallbackTag::GAME_OVERLAY_ACTIVATED, move |event| {
                if let CallbackEvent::OverlayActivated { active, .. } = event {
                    handler(*active);
                }
            })
    }
}
