//! Wire protocol shared between the sync server and its clients.
//!
//! Three fixed-layout binary message shapes, no framing beyond the one
//! discrete payload per transport message:
//! - identity: 4 bytes, `r,g,b,a` (alpha forced opaque on decode)
//! - delta: 8 bytes, `dx,dy` as f32 in native byte order
//! - roster frame: 12 bytes per live session, `x,y` f32 then `r,g,b,a`
//!
//! The codec never decides which shape a payload is; the connection
//! lifecycle does (first payload after connect is identity, the rest are
//! deltas). Here we only check exact lengths and pack/unpack bytes.

use std::error::Error;
use std::fmt;

pub const DEFAULT_PORT: u16 = 6777;
pub const TICK_INTERVAL_MS: u64 = 10;

pub const IDENTITY_LEN: usize = 4;
pub const DELTA_LEN: usize = 8;
pub const ROSTER_ENTRY_LEN: usize = 12;

/// Where every player starts until deltas move them.
pub const SPAWN_POSITION: Vec2 = Vec2 { x: 960.0, y: 540.0 };

/// 2D position or movement delta in unit-less world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A player's display color. Alpha is always 255 for players; the zero
/// value marks a session that has not announced its identity yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl PlayerColor {
    pub const ZERO: PlayerColor = PlayerColor {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    /// Fully opaque color, the only kind a player may wear.
    pub fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// The three message shapes, used for error reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Identity,
    Delta,
    Roster,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Identity => write!(f, "identity"),
            MessageKind::Delta => write!(f, "delta"),
            MessageKind::Roster => write!(f, "roster"),
        }
    }
}

/// Decode failure: the payload length does not match the fixed layout of
/// the message kind the caller expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    WrongLength {
        kind: MessageKind,
        expected: usize,
        actual: usize,
    },
    /// Roster payloads must be a whole number of 12-byte entries.
    RaggedRoster { actual: usize },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::WrongLength {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "malformed {} payload: expected {} bytes, got {}",
                kind, expected, actual
            ),
            WireError::RaggedRoster { actual } => write!(
                f,
                "malformed roster payload: {} bytes is not a multiple of {}",
                actual, ROSTER_ENTRY_LEN
            ),
        }
    }
}

impl Error for WireError {}

pub fn encode_identity(color: PlayerColor) -> [u8; IDENTITY_LEN] {
    [color.r, color.g, color.b, color.a]
}

/// Decodes a 4-byte identity announcement. The sender's alpha is ignored
/// and overwritten with 255.
pub fn decode_identity(payload: &[u8]) -> Result<PlayerColor, WireError> {
    if payload.len() != IDENTITY_LEN {
        return Err(WireError::WrongLength {
            kind: MessageKind::Identity,
            expected: IDENTITY_LEN,
            actual: payload.len(),
        });
    }

    Ok(PlayerColor::opaque(payload[0], payload[1], payload[2]))
}

pub fn encode_delta(delta: Vec2) -> [u8; DELTA_LEN] {
    let mut buf = [0u8; DELTA_LEN];
    buf[0..4].copy_from_slice(&delta.x.to_ne_bytes());
    buf[4..8].copy_from_slice(&delta.y.to_ne_bytes());
    buf
}

/// Decodes an 8-byte movement delta (two native-order f32s).
pub fn decode_delta(payload: &[u8]) -> Result<Vec2, WireError> {
    if payload.len() != DELTA_LEN {
        return Err(WireError::WrongLength {
            kind: MessageKind::Delta,
            expected: DELTA_LEN,
            actual: payload.len(),
        });
    }

    let dx = f32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let dy = f32::from_ne_bytes([payload[4], payload[5], payload[6], payload[7]]);
    Ok(Vec2::new(dx, dy))
}

/// One broadcast roster line: where a player is and what color they wear.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RosterEntry {
    pub position: Vec2,
    pub color: PlayerColor,
}

/// Packs a roster frame: 12 bytes per entry, in the order given. Entry
/// order follows registry iteration and is not stable across ticks.
pub fn encode_roster(entries: &[RosterEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * ROSTER_ENTRY_LEN);
    for entry in entries {
        buf.extend_from_slice(&entry.position.x.to_ne_bytes());
        buf.extend_from_slice(&entry.position.y.to_ne_bytes());
        buf.push(entry.color.r);
        buf.push(entry.color.g);
        buf.push(entry.color.b);
        buf.push(entry.color.a);
    }
    buf
}

pub fn decode_roster(payload: &[u8]) -> Result<Vec<RosterEntry>, WireError> {
    if payload.len() % ROSTER_ENTRY_LEN != 0 {
        return Err(WireError::RaggedRoster {
            actual: payload.len(),
        });
    }

    let mut entries = Vec::with_capacity(payload.len() / ROSTER_ENTRY_LEN);
    for chunk in payload.chunks_exact(ROSTER_ENTRY_LEN) {
        let x = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let y = f32::from_ne_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        entries.push(RosterEntry {
            position: Vec2::new(x, y),
            color: PlayerColor {
                r: chunk[8],
                g: chunk[9],
                b: chunk[10],
                a: chunk[11],
            },
        });
    }
    Ok(entries)
}
