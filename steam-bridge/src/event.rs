//! Callback records drained from the native queue and their decoded form.
//!
//! Payload layouts follow the SDK headers, which pack structs to 4 bytes on
//! Linux/macOS and 8 bytes on Windows. Only the offsets of fields that follow a
//! narrower field differ; [`align64`] captures that.

use serde::Serialize;

use crate::error::NativeCallError;
use crate::marshal::from_native64;

/// Native callback type id (`k_iCallback`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CallbackTag(pub i32);

impl CallbackTag {
    pub const PERSONA_STATE_CHANGE: CallbackTag = CallbackTag(304);
    pub const GAME_OVERLAY_ACTIVATED: CallbackTag = CallbackTag(331);
    pub const GAME_LOBBY_JOIN_REQUESTED: CallbackTag = CallbackTag(333);
    pub const GAME_RICH_PRESENCE_JOIN_REQUESTED: CallbackTag = CallbackTag(337);
    pub const LOBBY_CREATED: CallbackTag = CallbackTag(513);
    pub const LOW_BATTERY_POWER: CallbackTag = CallbackTag(702);
    pub const API_CALL_COMPLETED: CallbackTag = CallbackTag(703);
    pub const STEAM_SHUTDOWN: CallbackTag = CallbackTag(704);
    pub const GAMEPAD_TEXT_INPUT_DISMISSED: CallbackTag = CallbackTag(714);
    pub const USER_STATS_RECEIVED: CallbackTag = CallbackTag(1101);
    pub const NUMBER_OF_CURRENT_PLAYERS: CallbackTag = CallbackTag(1107);
    pub const MICRO_TXN_AUTHORIZATION_RESPONSE: CallbackTag = CallbackTag(152);

    /// Every tag [`decode`] understands.
    pub const KNOWN: &'static [CallbackTag] = &[
        Self::MICRO_TXN_AUTHORIZATION_RESPONSE,
        Self::PERSONA_STATE_CHANGE,
        Self::GAME_OVERLAY_ACTIVATED,
        Self::GAME_LOBBY_JOIN_REQUESTED,
        Self::GAME_RICH_PRESENCE_JOIN_REQUESTED,
        Self::LOBBY_CREATED,
        Self::LOW_BATTERY_POWER,
        Self::STEAM_SHUTDOWN,
        Self::GAMEPAD_TEXT_INPUT_DISMISSED,
        Self::USER_STATS_RECEIVED,
        Self::NUMBER_OF_CURRENT_PLAYERS,
    ];
}

impl std::fmt::Display for CallbackTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "callback #{}", self.0)
    }
}

/// One raw entry drained from the native callback queue.
///
/// `correlation` is set for async call results; `failed` reports the native
/// I/O failure flag for those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRecord {
    pub tag: CallbackTag,
    pub payload: Vec<u8>,
    pub correlation: Option<u64>,
    pub failed: bool,
}

impl CallbackRecord {
    pub fn new(tag: CallbackTag, payload: Vec<u8>) -> Self {
        Self {
            tag,
            payload,
            correlation: None,
            failed: false,
        }
    }

    pub fn call_result(id: u64, tag: CallbackTag, payload: Vec<u8>, failed: bool) -> Self {
        Self {
            tag,
            payload,
            correlation: Some(id),
            failed,
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Decoded callback payloads.
///
/// Serialized with `#[serde(tag = "type", content = "data")]` so JSON consumers
/// can switch on `type`. Identifiers are decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CallbackEvent {
    OverlayActivated {
        active: bool,
        user_initiated: bool,
        app_id: u32,
    },
    PersonaStateChanged {
        steam_id: String,
        change_flags: i32,
    },
    LobbyJoinRequested {
        lobby_id: String,
        friend_id: String,
    },
    RichPresenceJoinRequested {
        friend_id: String,
        connect: String,
    },
    LobbyCreated {
        result: i32,
        lobby_id: String,
    },
    UserStatsReceived {
        game_id: String,
        result: i32,
        user_id: String,
    },
    NumberOfCurrentPlayers {
        success: bool,
        players: i32,
    },
    MicroTxnAuthorizationResponse {
        app_id: u32,
        order_id: String,
        authorized: bool,
    },
    GamepadTextInputDismissed {
        submitted: bool,
        text_len: u32,
        app_id: u32,
    },
    LowBatteryPower {
        minutes_left: u8,
    },
    SteamShutdown,
}

impl CallbackEvent {
    pub fn tag(&self) -> CallbackTag {
        match self {
            CallbackEvent::OverlayActivated { .. } => CallbackTag::GAME_OVERLAY_ACTIVATED,
            CallbackEvent::PersonaStateChanged { .. } => CallbackTag::PERSONA_STATE_CHANGE,
            CallbackEvent::LobbyJoinRequested { .. } => CallbackTag::GAME_LOBBY_JOIN_REQUESTED,
            CallbackEvent::RichPresenceJoinRequested { .. } => {
                CallbackTag::GAME_RICH_PRESENCE_JOIN_REQUESTED
            }
            CallbackEvent::LobbyCreated { .. } => CallbackTag::LOBBY_CREATED,
            CallbackEvent::UserStatsReceived { .. } => CallbackTag::USER_STATS_RECEIVED,
            CallbackEvent::NumberOfCurrentPlayers { .. } => CallbackTag::NUMBER_OF_CURRENT_PLAYERS,
            CallbackEvent::MicroTxnAuthorizationResponse { .. } => {
                CallbackTag::MICRO_TXN_AUTHORIZATION_RESPONSE
            }
            CallbackEvent::GamepadTextInputDismissed { .. } => {
                CallbackTag::GAMEPAD_TEXT_INPUT_DISMISSED
            }
            CallbackEvent::LowBatteryPower { .. } => CallbackTag::LOW_BATTERY_POWER,
            CallbackEvent::SteamShutdown => CallbackTag::STEAM_SHUTDOWN,
        }
    }
}

/// Struct packing used by the SDK headers on this platform.
pub const PACK: usize = if cfg!(windows) { 8 } else { 4 };

/// Offset of a 64-bit field that follows a field ending at `offset`.
pub const fn align64(offset: usize) -> usize {
    offset.div_ceil(PACK) * PACK
}

/// Bounds-checked little-endian reads over a callback payload.
struct Payload<'a> {
    tag: CallbackTag,
    bytes: &'a [u8],
}

impl<'a> Payload<'a> {
    fn new(record: &'a CallbackRecord) -> Self {
        Self {
            tag: record.tag,
            bytes: &record.payload,
        }
    }

    fn field<const N: usize>(&self, offset: usize) -> Result<[u8; N], NativeCallError> {
        self.bytes
            .get(offset..offset + N)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| NativeCallError::Decode {
                tag: self.tag,
                reason: format!(
                    "payload of {} bytes too short for field at {offset}..{}",
                    self.bytes.len(),
                    offset + N
                ),
            })
    }

    fn u8(&self, offset: usize) -> Result<u8, NativeCallError> {
        Ok(self.field::<1>(offset)?[0])
    }

    fn bool(&self, offset: usize) -> Result<bool, NativeCallError> {
        Ok(self.u8(offset)? != 0)
    }

    fn i32(&self, offset: usize) -> Result<i32, NativeCallError> {
        self.field(offset).map(i32::from_le_bytes)
    }

    fn u32(&self, offset: usize) -> Result<u32, NativeCallError> {
        self.field(offset).map(u32::from_le_bytes)
    }

    fn u64(&self, offset: usize) -> Result<u64, NativeCallError> {
        self.field(offset).map(u64::from_le_bytes)
    }

    fn id(&self, offset: usize) -> Result<String, NativeCallError> {
        self.u64(offset).map(from_native64)
    }

    /// Fixed-size `char[len]` buffer, read up to the first NUL.
    fn text(&self, offset: usize, len: usize) -> Result<String, NativeCallError> {
        let end = (offset + len).min(self.bytes.len());
        let raw = self.bytes.get(offset..end).ok_or_else(|| NativeCallError::Decode {
            tag: self.tag,
            reason: format!("no text at offset {offset}"),
        })?;
        let raw = raw.split(|b| *b == 0).next().unwrap_or_default();
        String::from_utf8(raw.to_vec()).map_err(|e| NativeCallError::Decode {
            tag: self.tag,
            reason: e.to_string(),
        })
    }
}

/// Decode a record's payload by its type tag.
pub fn decode(record: &CallbackRecord) -> Result<CallbackEvent, NativeCallError> {
    let p = Payload::new(record);
    let event = match record.tag {
        CallbackTag::GAME_OVERLAY_ACTIVATED => CallbackEvent::OverlayActivated {
            active: p.bool(0)?,
            user_initiated: p.bool(1)?,
            app_id: p.u32(4)?,
        },
        CallbackTag::PERSONA_STATE_CHANGE => CallbackEvent::PersonaStateChanged {
            steam_id: p.id(0)?,
            change_flags: p.i32(8)?,
        },
        CallbackTag::GAME_LOBBY_JOIN_REQUESTED => CallbackEvent::LobbyJoinRequested {
            lobby_id: p.id(0)?,
            friend_id: p.id(8)?,
        },
        CallbackTag::GAME_RICH_PRESENCE_JOIN_REQUESTED => {
            CallbackEvent::RichPresenceJoinRequested {
                friend_id: p.id(0)?,
                connect: p.text(8, 256)?,
            }
        }
        CallbackTag::LOBBY_CREATED => CallbackEvent::LobbyCreated {
            result: p.i32(0)?,
            lobby_id: p.id(align64(4))?,
        },
        CallbackTag::USER_STATS_RECEIVED => CallbackEvent::UserStatsReceived {
            game_id: p.id(0)?,
            result: p.i32(8)?,
            user_id: p.id(align64(12))?,
        },
        CallbackTag::NUMBER_OF_CURRENT_PLAYERS => CallbackEvent::NumberOfCurrentPlayers {
            success: p.bool(0)?,
            players: p.i32(4)?,
        },
        CallbackTag::MICRO_TXN_AUTHORIZATION_RESPONSE => {
            CallbackEvent::MicroTxnAuthorizationResponse {
                app_id: p.u32(0)?,
                order_id: p.id(align64(4))?,
                authorized: p.bool(align64(4) + 8)?,
            }
        }
        CallbackTag::GAMEPAD_TEXT_INPUT_DISMISSED => CallbackEvent::GamepadTextInputDismissed {
            submitted: p.bool(0)?,
            text_len: p.u32(4)?,
            app_id: p.u32(8)?,
        },
        CallbackTag::LOW_BATTERY_POWER => CallbackEvent::LowBatteryPower {
            minutes_left: p.u8(0)?,
        },
        CallbackTag::STEAM_SHUTDOWN => CallbackEvent::SteamShutdown,
        other => return Err(NativeCallError::UnknownCallback(other)),
    };
    Ok(event)
}

/// `SteamAPICallCompleted_t`: the header announcing that an async call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiCallCompleted {
    pub call: u64,
    pub result_tag: CallbackTag,
    pub result_size: u32,
}

impl ApiCallCompleted {
    pub fn parse(record: &CallbackRecord) -> Result<Self, NativeCallError> {
        let p = Payload::new(record);
        Ok(Self {
            call: p.u64(0)?,
            result_tag: CallbackTag(p.i32(8)?),
            result_size: p.u32(12)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: CallbackTag, payload: Vec<u8>) -> CallbackRecord {
        CallbackRecord::new(tag, payload)
    }

    #[test]
    fn overlay_activated() {
        let mut bytes = vec![1u8, 0, 0, 0];
        bytes.extend_from_slice(&480u32.to_le_bytes());
        let event = decode(&record(CallbackTag::GAME_OVERLAY_ACTIVATED, bytes)).unwrap();
        assert_eq!(
            event,
            CallbackEvent::OverlayActivated {
                active: true,
                user_initiated: false,
                app_id: 480
            }
        );
        assert_eq!(event.tag(), CallbackTag::GAME_OVERLAY_ACTIVATED);
    }

    #[test]
    fn persona_state_change_keeps_id_precision() {
        let mut bytes = 76561198012345678u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001i32.to_le_bytes());
        let event = decode(&record(CallbackTag::PERSONA_STATE_CHANGE, bytes)).unwrap();
        assert_eq!(
            event,
            CallbackEvent::PersonaStateChanged {
                steam_id: "76561198012345678".to_string(),
                change_flags: 1
            }
        );
    }

    #[test]
    fn lobby_created_uses_platform_packing() {
        let lobby_offset = align64(4);
        let mut bytes = vec![0u8; lobby_offset + 8];
        bytes[0..4].copy_from_slice(&1i32.to_le_bytes());
        bytes[lobby_offset..].copy_from_slice(&109775241058045953u64.to_le_bytes());
        let event = decode(&record(CallbackTag::LOBBY_CREATED, bytes)).unwrap();
        assert_eq!(
            event,
            CallbackEvent::LobbyCreated {
                result: 1,
                lobby_id: "109775241058045953".to_string()
            }
        );
    }

    #[test]
    fn align64_matches_pack() {
        assert_eq!(align64(0), 0);
        assert_eq!(align64(8), 8);
        if cfg!(windows) {
            assert_eq!(align64(4), 8);
            assert_eq!(align64(12), 16);
        } else {
            assert_eq!(align64(4), 4);
            assert_eq!(align64(12), 12);
        }
    }

    #[test]
    fn rich_presence_connect_string_stops_at_nul() {
        let mut bytes = 76561197960287930u64.to_le_bytes().to_vec();
        let mut connect = [0u8; 256];
        connect[..11].copy_from_slice(b"+join 12345");
        bytes.extend_from_slice(&connect);
        let event = decode(&record(CallbackTag::GAME_RICH_PRESENCE_JOIN_REQUESTED, bytes)).unwrap();
        assert_eq!(
            event,
            CallbackEvent::RichPresenceJoinRequested {
                friend_id: "76561197960287930".to_string(),
                connect: "+join 12345".to_string()
            }
        );
    }

    #[test]
    fn short_payload_is_a_decode_error() {
        let err = decode(&record(CallbackTag::PERSONA_STATE_CHANGE, vec![1, 2, 3])).unwrap_err();
        assert!(matches!(
            err,
            NativeCallError::Decode {
                tag: CallbackTag::PERSONA_STATE_CHANGE,
                ..
            }
        ));
    }

    #[test]
    fn unknown_tag_is_reported() {
        let err = decode(&record(CallbackTag(9999), vec![])).unwrap_err();
        assert_eq!(err, NativeCallError::UnknownCallback(CallbackTag(9999)));
    }

    #[test]
    fn shutdown_has_empty_payload() {
        assert_eq!(
            decode(&record(CallbackTag::STEAM_SHUTDOWN, vec![])).unwrap(),
            CallbackEvent::SteamShutdown
        );
    }

    #[test]
    fn api_call_completed_header() {
        let mut bytes = 42u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1107i32.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        let header = ApiCallCompleted::parse(&record(CallbackTag::API_CALL_COMPLETED, bytes)).unwrap();
        assert_eq!(header.call, 42);
        assert_eq!(header.result_tag, CallbackTag::NUMBER_OF_CURRENT_PLAYERS);
        assert_eq!(header.result_size, 8);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = CallbackEvent::NumberOfCurrentPlayers {
            success: true,
            players: 1234,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "number_of_current_players");
        assert_eq!(json["data"]["players"], 1234);
    }
}
