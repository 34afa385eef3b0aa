//! Packet kinds and the identifiers that travel inside packets.
//!
//! Every packet starts with a 4-byte length and a one-byte
//! [`PacketKind`]. The kinds form a closed set: connection bootstrap,
//! keepalive, channel membership, player and host changes, object
//! lifetime, file storage, and the "forward" family that carries remote
//! function calls to a [`Target`].

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{DataNode, ProtocolError};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A player's identifier, assigned by the server during the handshake.
///
/// A newtype rather than a bare `u32`, so a `ChannelId` can never be
/// passed where a `PlayerId` is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A channel's identifier. Channels are chosen by the client, not
/// assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// What a client knows about another player in its channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    /// Arbitrary per-player data, synchronized by the server.
    pub data: Option<DataNode>,
}

impl PlayerInfo {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PacketKind
// ---------------------------------------------------------------------------

/// The kind byte that follows every length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketKind {
    /// A human-readable error. Also synthesized locally when a
    /// connection fails.
    Error = 1,
    /// The connection is closing. Synthesized locally exactly once per
    /// connection.
    Disconnect = 2,

    /// Client bootstrap: protocol version, player name, player data.
    RequestId = 3,
    /// Server reply: server protocol version and the assigned player id.
    ResponseId = 4,
    RequestPing = 5,
    ResponsePing = 6,

    RequestJoinChannel = 10,
    /// Sent before [`ResponseJoinChannel`](Self::ResponseJoinChannel):
    /// the channel id and the players already in it.
    ResponseJoiningChannel = 11,
    ResponseJoinChannel = 12,
    RequestLeaveChannel = 13,
    ResponseLeaveChannel = 14,
    RequestCloseChannel = 15,
    ResponsePlayerJoined = 16,
    ResponsePlayerLeft = 17,

    RequestSetName = 20,
    ResponseRenamePlayer = 21,
    RequestSetHost = 22,
    ResponseSetHost = 23,

    RequestCreateObject = 30,
    ResponseCreateObject = 31,
    RequestDestroyObject = 32,
    ResponseDestroyObject = 33,

    RequestSaveFile = 40,
    RequestLoadFile = 41,
    ResponseLoadFile = 42,

    ForwardToAll = 50,
    ForwardToAllSaved = 51,
    ForwardToOthers = 52,
    ForwardToOthersSaved = 53,
    ForwardToHost = 54,
    ForwardToPlayer = 55,
    ForwardToPlayerBuffered = 56,
}

impl PacketKind {
    /// Parses a kind byte.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        Self::try_from(byte).map_err(|_| ProtocolError::UnknownPacket(byte))
    }

    /// Returns `true` for the forward family.
    pub fn is_forward(self) -> bool {
        Target::from_kind(self).is_some()
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Who a forwarded call is delivered to.
///
/// The `Saved` variants also ask the server to keep the call and replay
/// it to players who join the channel later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    All,
    AllSaved,
    Others,
    OthersSaved,
    Host,
    Player(PlayerId),
    PlayerSaved(PlayerId),
}

impl Target {
    /// The packet kind that carries a call to this target.
    pub fn kind(self) -> PacketKind {
        match self {
            Self::All => PacketKind::ForwardToAll,
            Self::AllSaved => PacketKind::ForwardToAllSaved,
            Self::Others => PacketKind::ForwardToOthers,
            Self::OthersSaved => PacketKind::ForwardToOthersSaved,
            Self::Host => PacketKind::ForwardToHost,
            Self::Player(_) => PacketKind::ForwardToPlayer,
            Self::PlayerSaved(_) => PacketKind::ForwardToPlayerBuffered,
        }
    }

    /// The target a forward kind addresses. Player targets carry a
    /// placeholder id; the real one follows in the payload.
    pub(crate) fn from_kind(kind: PacketKind) -> Option<Self> {
        Some(match kind {
            PacketKind::ForwardToAll => Self::All,
            PacketKind::ForwardToAllSaved => Self::AllSaved,
            PacketKind::ForwardToOthers => Self::Others,
            PacketKind::ForwardToOthersSaved => Self::OthersSaved,
            PacketKind::ForwardToHost => Self::Host,
            PacketKind::ForwardToPlayer => Self::Player(PlayerId(0)),
            PacketKind::ForwardToPlayerBuffered => Self::PlayerSaved(PlayerId(0)),
            _ => return None,
        })
    }

    /// The addressed player, for the player targets.
    pub fn player(self) -> Option<PlayerId> {
        match self {
            Self::Player(id) | Self::PlayerSaved(id) => Some(id),
            _ => None,
        }
    }

    /// Whether the server keeps the call for late joiners.
    pub fn is_saved(self) -> bool {
        matches!(
            self,
            Self::AllSaved | Self::OthersSaved | Self::PlayerSaved(_)
        )
    }
}

// ---------------------------------------------------------------------------
// FunctionAddress
// ---------------------------------------------------------------------------

/// Which function on which object a forwarded call invokes.
///
/// Packed into 32 bits on the wire: the object id in the upper 24 bits,
/// the function id in the lower 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionAddress {
    object_id: u32,
    function_id: u8,
}

impl FunctionAddress {
    /// Largest object id that fits in 24 bits.
    pub const MAX_OBJECT_ID: u32 = 0x00FF_FFFF;

    pub fn new(object_id: u32, function_id: u8) -> Result<Self, ProtocolError> {
        if object_id > Self::MAX_OBJECT_ID {
            return Err(ProtocolError::ObjectIdOutOfRange(object_id));
        }
        Ok(Self {
            object_id,
            function_id,
        })
    }

    pub fn object_id(self) -> u32 {
        self.object_id
    }

    pub fn function_id(self) -> u8 {
        self.function_id
    }

    pub fn pack(self) -> u32 {
        (self.object_id << 8) | u32::from(self.function_id)
    }

    pub fn unpack(packed: u32) -> Self {
        Self {
            object_id: packed >> 8,
            function_id: (packed & 0xFF) as u8,
        }
    }
}

impl fmt::Display for FunctionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object_id, self.function_id)
    }
}
