//! Feature entry points the bridge knows how to call.
//!
//! Each entry names the flat-API export, its parameter kinds after the interface
//! `self` pointer, and its return kind. Functions returning `SteamAPICall_t` also
//! name the callback type that completes them.

use crate::event::CallbackTag;
use crate::registry::InterfaceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    I32,
    U32,
    U64,
    Str,
}

impl ParamKind {
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Bool => "bool",
            ParamKind::I32 => "i32",
            ParamKind::U32 => "u32",
            ParamKind::U64 => "u64",
            ParamKind::Str => "string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Bool,
    I32,
    U32,
    U64,
    Str,
    /// A `SteamAPICall_t` completed later by the given callback type.
    ApiCall(CallbackTag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub interface: InterfaceKind,
    pub name: &'static str,
    pub symbol: &'static str,
    pub params: &'static [ParamKind],
    pub ret: ReturnKind,
}

impl FunctionSpec {
    pub fn result_tag(&self) -> Option<CallbackTag> {
        match self.ret {
            ReturnKind::ApiCall(tag) => Some(tag),
            _ => None,
        }
    }
}

use InterfaceKind as I;
use ParamKind as P;
use ReturnKind as R;

macro_rules! function {
    ($iface:ident, $name:literal, [$($param:ident),*], $ret:expr) => {
        FunctionSpec {
            interface: I::$iface,
            name: $name,
            symbol: concat!("SteamAPI_ISteam", stringify!($iface), "_", $name),
            params: &[$(P::$param),*],
            ret: $ret,
        }
    };
}

pub static FUNCTIONS: &[FunctionSpec] = &[
    function!(Friends, "ActivateGameOverlay", [Str], R::Void),
    function!(Friends, "ActivateGameOverlayToUser", [Str, U64], R::Void),
    function!(Friends, "ActivateGameOverlayToWebPage", [Str, I32], R::Void),
    function!(Friends, "ActivateGameOverlayToStore", [U32, I32], R::Void),
    function!(Friends, "ActivateGameOverlayInviteDialog", [U64], R::Void),
    function!(Friends, "GetPersonaName", [], R::Str),
    function!(Friends, "GetFriendCount", [I32], R::I32),
    function!(Friends, "SetRichPresence", [Str, Str], R::Bool),
    function!(Friends, "ClearRichPresence", [], R::Void),
    function!(Utils, "IsOverlayEnabled", [], R::Bool),
    function!(Utils, "GetAppID", [], R::U32),
    function!(Utils, "IsSteamRunningOnSteamDeck", [], R::Bool),
    function!(Apps, "BIsSubscribedApp", [U32], R::Bool),
    function!(Apps, "BIsDlcInstalled", [U32], R::Bool),
    function!(Apps, "GetCurrentGameLanguage", [], R::Str),
    function!(User, "GetSteamID", [], R::U64),
    function!(User, "BLoggedOn", [], R::Bool),
    function!(UserStats, "RequestUserStats", [U64], R::ApiCall(CallbackTag::USER_STATS_RECEIVED)),
    function!(UserStats, "GetNumberOfCurrentPlayers", [], R::ApiCall(CallbackTag::NUMBER_OF_CURRENT_PLAYERS)),
    function!(UserStats, "SetAchievement", [Str], R::Bool),
    function!(UserStats, "ClearAchievement", [Str], R::Bool),
    function!(UserStats, "StoreStats", [], R::Bool),
    function!(Matchmaking, "CreateLobby", [I32, I32], R::ApiCall(CallbackTag::LOBBY_CREATED)),
    function!(Matchmaking, "LeaveLobby", [U64], R::Void),
];

/// Find a function by interface and method name.
pub fn lookup(interface: InterfaceKind, name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS
        .iter()
        .find(|f| f.interface == interface && f.name == name)
}
