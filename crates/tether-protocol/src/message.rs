//! Typed protocol messages.
//!
//! [`Message`] is the decoded form of one packet. Encoding writes the
//! packet header with [`Buffer::begin_packet`], the payload through the
//! [`ObjectCodec`], and back-patches the length; decoding reads the kind
//! byte and the payload that follows it.

use tether_buffer::{Buffer, BufferError, PACKET_HEADER_LEN};

use crate::codec::{read_count, read_string, write_count, write_string};
use crate::packet::{ChannelId, FunctionAddress, PacketKind, PlayerId, PlayerInfo, Target};
use crate::{DataNode, ObjectCodec, ProtocolError, Value};

/// One decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Error(String),
    Disconnect,

    RequestId {
        version: u32,
        name: String,
        data: Option<DataNode>,
    },
    ResponseId {
        version: u32,
        player_id: PlayerId,
    },
    RequestPing,
    ResponsePing,

    RequestJoinChannel {
        channel_id: ChannelId,
        /// Empty when the channel has no password.
        password: String,
    },
    ResponseJoiningChannel {
        channel_id: ChannelId,
        players: Vec<PlayerInfo>,
    },
    ResponseJoinChannel {
        channel_id: ChannelId,
        success: bool,
        /// Why the join failed. Empty on success.
        message: String,
    },
    RequestLeaveChannel {
        channel_id: ChannelId,
    },
    ResponseLeaveChannel {
        channel_id: ChannelId,
    },
    RequestCloseChannel {
        channel_id: ChannelId,
    },
    ResponsePlayerJoined {
        channel_id: ChannelId,
        player: PlayerInfo,
    },
    ResponsePlayerLeft {
        channel_id: ChannelId,
        player_id: PlayerId,
    },

    RequestSetName {
        name: String,
    },
    ResponseRenamePlayer {
        player_id: PlayerId,
        name: String,
    },
    RequestSetHost {
        channel_id: ChannelId,
        player_id: PlayerId,
    },
    ResponseSetHost {
        channel_id: ChannelId,
        player_id: PlayerId,
    },

    RequestCreateObject {
        channel_id: ChannelId,
        prefab: String,
        /// Whether the object outlives its creator leaving the channel.
        persistent: bool,
        args: Vec<Value>,
    },
    ResponseCreateObject {
        channel_id: ChannelId,
        creator: PlayerId,
        object_id: u32,
        prefab: String,
        args: Vec<Value>,
    },
    RequestDestroyObject {
        channel_id: ChannelId,
        object_id: u32,
    },
    ResponseDestroyObject {
        channel_id: ChannelId,
        object_ids: Vec<u32>,
    },

    RequestSaveFile {
        file_name: String,
        data: Vec<u8>,
    },
    RequestLoadFile {
        file_name: String,
    },
    ResponseLoadFile {
        file_name: String,
        data: Vec<u8>,
    },

    /// A remote function call. The payload starts with the packed
    /// address, then the player id for player targets, then the
    /// arguments.
    Forward {
        target: Target,
        address: FunctionAddress,
        args: Vec<Value>,
    },
}

impl Message {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Error(_) => PacketKind::Error,
            Self::Disconnect => PacketKind::Disconnect,
            Self::RequestId { .. } => PacketKind::RequestId,
            Self::ResponseId { .. } => PacketKind::ResponseId,
            Self::RequestPing => PacketKind::RequestPing,
            Self::ResponsePing => PacketKind::ResponsePing,
            Self::RequestJoinChannel { .. } => PacketKind::RequestJoinChannel,
            Self::ResponseJoiningChannel { .. } => PacketKind::ResponseJoiningChannel,
            Self::ResponseJoinChannel { .. } => PacketKind::ResponseJoinChannel,
            Self::RequestLeaveChannel { .. } => PacketKind::RequestLeaveChannel,
            Self::ResponseLeaveChannel { .. } => PacketKind::ResponseLeaveChannel,
            Self::RequestCloseChannel { .. } => PacketKind::RequestCloseChannel,
            Self::ResponsePlayerJoined { .. } => PacketKind::ResponsePlayerJoined,
            Self::ResponsePlayerLeft { .. } => PacketKind::ResponsePlayerLeft,
            Self::RequestSetName { .. } => PacketKind::RequestSetName,
            Self::ResponseRenamePlayer { .. } => PacketKind::ResponseRenamePlayer,
            Self::RequestSetHost { .. } => PacketKind::RequestSetHost,
            Self::ResponseSetHost { .. } => PacketKind::ResponseSetHost,
            Self::RequestCreateObject { .. } => PacketKind::RequestCreateObject,
            Self::ResponseCreateObject { .. } => PacketKind::ResponseCreateObject,
            Self::RequestDestroyObject { .. } => PacketKind::RequestDestroyObject,
            Self::ResponseDestroyObject { .. } => PacketKind::ResponseDestroyObject,
            Self::RequestSaveFile { .. } => PacketKind::RequestSaveFile,
            Self::RequestLoadFile { .. } => PacketKind::RequestLoadFile,
            Self::ResponseLoadFile { .. } => PacketKind::ResponseLoadFile,
            Self::Forward { target, .. } => target.kind(),
        }
    }

    /// Writes this message into `buf` as one complete packet and returns
    /// the packet size.
    pub fn encode(&self, codec: &ObjectCodec, buf: &mut Buffer) -> Result<usize, ProtocolError> {
        buf.begin_packet(self.kind().into());
        self.write_payload(codec, buf)?;
        Ok(buf.end_packet()?)
    }

    /// Decodes the packet held in `buf`, which must start at its length
    /// prefix.
    pub fn decode(codec: &ObjectCodec, buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let kind = buf.packet_kind().ok_or(BufferError::NoPacketHeader)?;
        let kind = PacketKind::from_byte(kind)?;
        buf.begin_read(PACKET_HEADER_LEN)?;
        Self::read_payload(kind, codec, buf)
    }

    fn write_payload(&self, codec: &ObjectCodec, buf: &mut Buffer) -> Result<(), ProtocolError> {
        match self {
            Self::Error(message) => write_string(buf, message)?,
            Self::Disconnect | Self::RequestPing | Self::ResponsePing => {}
            Self::RequestId {
                version,
                name,
                data,
            } => {
                buf.write_u32(*version);
                write_string(buf, name)?;
                write_data(codec, buf, data.as_ref())?;
            }
            Self::ResponseId { version, player_id } => {
                buf.write_u32(*version);
                buf.write_u32(player_id.0);
            }
            Self::RequestJoinChannel {
                channel_id,
                password,
            } => {
                buf.write_u32(channel_id.0);
                write_string(buf, password)?;
            }
            Self::ResponseJoiningChannel {
                channel_id,
                players,
            } => {
                buf.write_u32(channel_id.0);
                write_count(buf, players.len())?;
                for player in players {
                    write_player(codec, buf, player)?;
                }
            }
            Self::ResponseJoinChannel {
                channel_id,
                success,
                message,
            } => {
                buf.write_u32(channel_id.0);
                buf.write_bool(*success);
                write_string(buf, message)?;
            }
            Self::RequestLeaveChannel { channel_id }
            | Self::ResponseLeaveChannel { channel_id }
            | Self::RequestCloseChannel { channel_id } => buf.write_u32(channel_id.0),
            Self::ResponsePlayerJoined { channel_id, player } => {
                buf.write_u32(channel_id.0);
                write_player(codec, buf, player)?;
            }
            Self::ResponsePlayerLeft {
                channel_id,
                player_id,
            }
            | Self::RequestSetHost {
                channel_id,
                player_id,
            }
            | Self::ResponseSetHost {
                channel_id,
                player_id,
            } => {
                buf.write_u32(channel_id.0);
                buf.write_u32(player_id.0);
            }
            Self::RequestSetName { name } => write_string(buf, name)?,
            Self::ResponseRenamePlayer { player_id, name } => {
                buf.write_u32(player_id.0);
                write_string(buf, name)?;
            }
            Self::RequestCreateObject {
                channel_id,
                prefab,
                persistent,
                args,
            } => {
                buf.write_u32(channel_id.0);
                write_string(buf, prefab)?;
                buf.write_bool(*persistent);
                write_args(codec, buf, args)?;
            }
            Self::ResponseCreateObject {
                channel_id,
                creator,
                object_id,
                prefab,
                args,
            } => {
                buf.write_u32(channel_id.0);
                buf.write_u32(creator.0);
                buf.write_u32(*object_id);
                write_string(buf, prefab)?;
                write_args(codec, buf, args)?;
            }
            Self::RequestDestroyObject {
                channel_id,
                object_id,
            } => {
                buf.write_u32(channel_id.0);
                buf.write_u32(*object_id);
            }
            Self::ResponseDestroyObject {
                channel_id,
                object_ids,
            } => {
                buf.write_u32(channel_id.0);
                write_count(buf, object_ids.len())?;
                for id in object_ids {
                    buf.write_u32(*id);
                }
            }
            Self::RequestSaveFile { file_name, data }
            | Self::ResponseLoadFile { file_name, data } => {
                write_string(buf, file_name)?;
                write_count(buf, data.len())?;
                buf.write_bytes(data);
            }
            Self::RequestLoadFile { file_name } => write_string(buf, file_name)?,
            Self::Forward {
                target,
                address,
                args,
            } => {
                buf.write_u32(address.pack());
                if let Some(player) = target.player() {
                    buf.write_u32(player.0);
                }
                write_args(codec, buf, args)?;
            }
        }
        Ok(())
    }

    fn read_payload(
        kind: PacketKind,
        codec: &ObjectCodec,
        buf: &mut Buffer,
    ) -> Result<Self, ProtocolError> {
        let channel = |buf: &mut Buffer| -> Result<ChannelId, ProtocolError> {
            Ok(ChannelId(buf.read_u32()?))
        };
        let player = |buf: &mut Buffer| -> Result<PlayerId, ProtocolError> {
            Ok(PlayerId(buf.read_u32()?))
        };

        Ok(match kind {
            PacketKind::Error => Self::Error(read_string(buf)?),
            PacketKind::Disconnect => Self::Disconnect,
            PacketKind::RequestId => Self::RequestId {
                version: buf.read_u32()?,
                name: read_string(buf)?,
                data: read_data(codec, buf)?,
            },
            PacketKind::ResponseId => Self::ResponseId {
                version: buf.read_u32()?,
                player_id: player(buf)?,
            },
            PacketKind::RequestPing => Self::RequestPing,
            PacketKind::ResponsePing => Self::ResponsePing,
            PacketKind::RequestJoinChannel => Self::RequestJoinChannel {
                channel_id: channel(buf)?,
                password: read_string(buf)?,
            },
            PacketKind::ResponseJoiningChannel => {
                let channel_id = channel(buf)?;
                let count = read_count(buf)?;
                // id + name count + data tag
                if count.saturating_mul(6) > buf.remaining() {
                    return Err(ProtocolError::ImplausibleLength {
                        count,
                        remaining: buf.remaining(),
                    });
                }
                let players = (0..count)
                    .map(|_| read_player(codec, buf))
                    .collect::<Result<_, _>>()?;
                Self::ResponseJoiningChannel {
                    channel_id,
                    players,
                }
            }
            PacketKind::ResponseJoinChannel => Self::ResponseJoinChannel {
                channel_id: channel(buf)?,
                success: buf.read_bool()?,
                message: read_string(buf)?,
            },
            PacketKind::RequestLeaveChannel => Self::RequestLeaveChannel {
                channel_id: channel(buf)?,
            },
            PacketKind::ResponseLeaveChannel => Self::ResponseLeaveChannel {
                channel_id: channel(buf)?,
            },
            PacketKind::RequestCloseChannel => Self::RequestCloseChannel {
                channel_id: channel(buf)?,
            },
            PacketKind::ResponsePlayerJoined => Self::ResponsePlayerJoined {
                channel_id: channel(buf)?,
                player: read_player(codec, buf)?,
            },
            PacketKind::ResponsePlayerLeft => Self::ResponsePlayerLeft {
                channel_id: channel(buf)?,
                player_id: player(buf)?,
            },
            PacketKind::RequestSetName => Self::RequestSetName {
                name: read_string(buf)?,
            },
            PacketKind::ResponseRenamePlayer => Self::ResponseRenamePlayer {
                player_id: player(buf)?,
                name: read_string(buf)?,
            },
            PacketKind::RequestSetHost => Self::RequestSetHost {
                channel_id: channel(buf)?,
                player_id: player(buf)?,
            },
            PacketKind::ResponseSetHost => Self::ResponseSetHost {
                channel_id: channel(buf)?,
                player_id: player(buf)?,
            },
            PacketKind::RequestCreateObject => Self::RequestCreateObject {
                channel_id: channel(buf)?,
                prefab: read_string(buf)?,
                persistent: buf.read_bool()?,
                args: read_args(codec, buf)?,
            },
            PacketKind::ResponseCreateObject => Self::ResponseCreateObject {
                channel_id: channel(buf)?,
                creator: player(buf)?,
                object_id: buf.read_u32()?,
                prefab: read_string(buf)?,
                args: read_args(codec, buf)?,
            },
            PacketKind::RequestDestroyObject => Self::RequestDestroyObject {
                channel_id: channel(buf)?,
                object_id: buf.read_u32()?,
            },
            PacketKind::ResponseDestroyObject => {
                let channel_id = channel(buf)?;
                let count = read_count(buf)?;
                if count.saturating_mul(4) > buf.remaining() {
                    return Err(ProtocolError::ImplausibleLength {
                        count,
                        remaining: buf.remaining(),
                    });
                }
                let object_ids = (0..count)
                    .map(|_| buf.read_u32())
                    .collect::<Result<_, _>>()?;
                Self::ResponseDestroyObject {
                    channel_id,
                    object_ids,
                }
            }
            PacketKind::RequestSaveFile => {
                let (file_name, data) = read_file(buf)?;
                Self::RequestSaveFile { file_name, data }
            }
            PacketKind::RequestLoadFile => Self::RequestLoadFile {
                file_name: read_string(buf)?,
            },
            PacketKind::ResponseLoadFile => {
                let (file_name, data) = read_file(buf)?;
                Self::ResponseLoadFile { file_name, data }
            }
            PacketKind::ForwardToAll
            | PacketKind::ForwardToAllSaved
            | PacketKind::ForwardToOthers
            | PacketKind::ForwardToOthersSaved
            | PacketKind::ForwardToHost
            | PacketKind::ForwardToPlayer
            | PacketKind::ForwardToPlayerBuffered => {
                let address = FunctionAddress::unpack(buf.read_u32()?);
                let target = match kind {
                    PacketKind::ForwardToPlayer => Target::Player(player(buf)?),
                    PacketKind::ForwardToPlayerBuffered => Target::PlayerSaved(player(buf)?),
                    other => Target::from_kind(other).ok_or_else(|| {
                        ProtocolError::InvalidMessage(format!("{other} is not a forward"))
                    })?,
                };
                Self::Forward {
                    target,
                    address,
                    args: read_args(codec, buf)?,
                }
            }
        })
    }
}

fn write_data(codec: &ObjectCodec, buf: &mut Buffer, data: Option<&DataNode>) -> Result<(), ProtocolError> {
    match data {
        Some(node) => codec.write(buf, &Value::Document(Box::new(node.clone()))),
        None => codec.write(buf, &Value::Null),
    }
}

fn read_data(codec: &ObjectCodec, buf: &mut Buffer) -> Result<Option<DataNode>, ProtocolError> {
    match codec.read(buf)? {
        Value::Null => Ok(None),
        Value::Document(node) => Ok(Some(*node)),
        other => Err(ProtocolError::TypeMismatch {
            expected: "DataNode".into(),
            found: other.type_name(),
        }),
    }
}

fn write_player(codec: &ObjectCodec, buf: &mut Buffer, player: &PlayerInfo) -> Result<(), ProtocolError> {
    buf.write_u32(player.id.0);
    write_string(buf, &player.name)?;
    write_data(codec, buf, player.data.as_ref())
}

fn read_player(codec: &ObjectCodec, buf: &mut Buffer) -> Result<PlayerInfo, ProtocolError> {
    Ok(PlayerInfo {
        id: PlayerId(buf.read_u32()?),
        name: read_string(buf)?,
        data: read_data(codec, buf)?,
    })
}

fn write_args(codec: &ObjectCodec, buf: &mut Buffer, args: &[Value]) -> Result<(), ProtocolError> {
    write_count(buf, args.len())?;
    for arg in args {
        codec.write(buf, arg)?;
    }
    Ok(())
}

fn read_args(codec: &ObjectCodec, buf: &mut Buffer) -> Result<Vec<Value>, ProtocolError> {
    let count = read_count(buf)?;
    if count > buf.remaining() {
        return Err(ProtocolError::ImplausibleLength {
            count,
            remaining: buf.remaining(),
        });
    }
    (0..count).map(|_| codec.read(buf)).collect()
}

fn read_file(buf: &mut Buffer) -> Result<(String, Vec<u8>), ProtocolError> {
    let file_name = read_string(buf)?;
    let len = read_count(buf)?;
    Ok((file_name, buf.read_bytes(len)?.to_vec()))
}
