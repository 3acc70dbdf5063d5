//! Interface registry: the sole owner of native interface pointers.
//!
//! Callers only ever hold an [`InterfaceHandle`], a `(kind, epoch)` token. The
//! native pointer behind it is looked up here at call time, and tokens from an
//! earlier epoch are refused.

use serde::Serialize;

use crate::error::LifecycleError;
use crate::native::NativePtr;

/// Feature subsystems exposed by the native library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InterfaceKind {
    Friends,
    Utils,
    Apps,
    User,
    UserStats,
    Matchmaking,
}

impl InterfaceKind {
    pub const ALL: [InterfaceKind; 6] = [
        InterfaceKind::Friends,
        InterfaceKind::Utils,
        InterfaceKind::Apps,
        InterfaceKind::User,
        InterfaceKind::UserStats,
        InterfaceKind::Matchmaking,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InterfaceKind::Friends => "Friends",
            InterfaceKind::Utils => "Utils",
            InterfaceKind::Apps => "Apps",
            InterfaceKind::User => "User",
            InterfaceKind::UserStats => "UserStats",
            InterfaceKind::Matchmaking => "Matchmaking",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    /// Versioned flat-API accessor returning this interface's pointer.
    pub fn accessor_symbol(self) -> &'static str {
        match self {
            InterfaceKind::Friends => "SteamAPI_SteamFriends_v017",
            InterfaceKind::Utils => "SteamAPI_SteamUtils_v010",
            InterfaceKind::Apps => "SteamAPI_SteamApps_v008",
            InterfaceKind::User => "SteamAPI_SteamUser_v023",
            InterfaceKind::UserStats => "SteamAPI_SteamUserStats_v013",
            InterfaceKind::Matchmaking => "SteamAPI_SteamMatchmaking_v009",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Generation counter; advanced on every successful initialize and every shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Epoch(pub u64);

/// Opaque token for a cached interface, valid only within its epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHandle {
    kind: InterfaceKind,
    epoch: Epoch,
}

impl InterfaceHandle {
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Unresolved,
    Resolved(Option<NativePtr>),
}

pub(crate) struct InterfaceRegistry {
    epoch: Epoch,
    active: bool,
    slots: [Slot; InterfaceKind::ALL.len()],
}

impl InterfaceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Epoch::default(),
            active: false,
            slots: [Slot::Unresolved; InterfaceKind::ALL.len()],
        }
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Start a fresh epoch after a successful initialize.
    pub(crate) fn open_epoch(&mut self) -> Epoch {
        self.advance();
        self.active = true;
        self.epoch
    }

    /// Drop every cached pointer and move past the current epoch.
    pub(crate) fn close_epoch(&mut self) {
        self.advance();
        self.active = false;
    }

    fn advance(&mut self) {
        self.epoch = Epoch(self.epoch.0 + 1);
        self.slots = [Slot::Unresolved; InterfaceKind::ALL.len()];
    }

    /// Return a handle for `kind`, querying `fetch` at most once per epoch.
    pub(crate) fn get_or_resolve(
        &mut self,
        kind: InterfaceKind,
        fetch: impl FnOnce(InterfaceKind) -> Option<NativePtr>,
    ) -> Option<InterfaceHandle> {
        if !self.active {
            return None;
        }
        let slot = &mut self.slots[kind.index()];
        let ptr = match *slot {
            Slot::Resolved(ptr) => ptr,
            Slot::Unresolved => {
                let ptr = fetch(kind);
                if ptr.is_none() {
                    tracing::warn!("native accessor for {} returned null", kind.name());
                }
                *slot = Slot::Resolved(ptr);
                ptr
            }
        };
        ptr.map(|_| InterfaceHandle {
            kind,
            epoch: self.epoch,
        })
    }

    /// Map a handle back to its native pointer.
    pub(crate) fn resolve(&self, handle: InterfaceHandle) -> Result<NativePtr, LifecycleError> {
        if !self.active || handle.epoch != self.epoch {
            return Err(LifecycleError::StaleHandle {
                handle: handle.epoch.0,
                current: self.epoch.0,
            });
        }
        match self.slots[handle.kind.index()] {
            Slot::Resolved(Some(ptr)) => Ok(ptr),
            _ => Err(LifecycleError::InterfaceUnavailable(handle.kind)),
        }
    }
}
