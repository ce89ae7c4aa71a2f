//! Protocol constants and matchmaking message types shared between the
//! Berth client SDK and server-side tooling.
//!
//! The first byte of every inbound non-control WebSocket frame is a
//! [`Protocol`] code; the rest of the frame is interpreted per code.
//! Matchmaking runs over HTTP and exchanges the JSON types in this crate.

use serde::{Deserialize, Serialize};

/// Ingress message codes. Room-related codes occupy the 9..=17 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protocol {
    /// Reflection blob describing the server's schema types.
    Handshake = 9,
    /// Session confirmation: reconnection token + serializer id.
    JoinRoom = 10,
    /// Server error: `{code: uint, message: string}`.
    Error = 11,
    /// Remote close.
    LeaveRoom = 12,
    /// User message addressed by a string type.
    RoomData = 13,
    /// Full-state snapshot, fed to the decoder.
    RoomState = 14,
    /// Incremental state delta, fed to the decoder.
    RoomStatePatch = 15,
    /// Schema-typed user message: type id + encoded body.
    RoomDataSchema = 16,
    /// User message addressed by an integer type, raw payload.
    RoomDataBytes = 17,
}

impl Protocol {
    pub fn from_u8(code: u8) -> Option<Protocol> {
        Some(match code {
            9 => Protocol::Handshake,
            10 => Protocol::JoinRoom,
            11 => Protocol::Error,
            12 => Protocol::LeaveRoom,
            13 => Protocol::RoomData,
            14 => Protocol::RoomState,
            15 => Protocol::RoomStatePatch,
            16 => Protocol::RoomDataSchema,
            17 => Protocol::RoomDataBytes,
            _ => return None,
        })
    }
}

/// WebSocket close codes with protocol-level meaning.
pub mod close_code {
    /// The client left on purpose; no reconnection is expected.
    pub const CONSENTED: u16 = 4000;
    /// The server restarted in dev mode; the client should reconnect
    /// with its stored reconnection token.
    pub const DEVMODE_RESTART: u16 = 4010;
}

/// Server-side error codes (matchmaking and application errors).
pub mod error_code {
    pub const MATCHMAKE_NO_HANDLER: u32 = 4210;
    pub const MATCHMAKE_INVALID_CRITERIA: u32 = 4211;
    pub const MATCHMAKE_INVALID_ROOM_ID: u32 = 4212;
    pub const MATCHMAKE_UNHANDLED: u32 = 4213;
    pub const MATCHMAKE_EXPIRED: u32 = 4214;
    pub const AUTH_FAILED: u32 = 4215;
    pub const APPLICATION_ERROR: u32 = 4216;
}

/// Publicly visible room metadata, as returned by matchmaking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAvailable {
    pub room_id: String,
    pub name: String,
    #[serde(default)]
    pub process_id: String,
    #[serde(default)]
    pub public_address: Option<String>,
    #[serde(default)]
    pub clients: u32,
    #[serde(default)]
    pub max_clients: u32,
}

/// A granted seat in a specific room: the matchmaking reply. The client
/// uses it once, to open the room's WebSocket endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatReservation {
    pub session_id: String,
    #[serde(default)]
    pub reconnection_token: Option<String>,
    pub room: RoomAvailable,
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Error body returned by the matchmaking endpoints on rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakeErrorBody {
    pub code: u32,
    pub message: String,
}
