//! Wire format for Tether.
//!
//! This crate knows how values, documents, and packets look as bytes. It
//! does no I/O on sockets; the transport crate moves the buffers this
//! crate fills.
//!
//! - [`Value`] and [`ObjectCodec`]: the tagged binary codec for every
//!   supported value type, plus the [`BinarySerializable`] and
//!   [`Describe`] extension points for user types.
//! - [`DataNode`]: a tree of named values with text, binary, and
//!   compressed forms, used for configuration and structured payloads.
//! - [`PacketKind`], [`Target`], [`FunctionAddress`]: packet framing
//!   vocabulary.
//! - [`Message`]: typed encode/decode of whole packets.
//!
//! # Example
//!
//! ```
//! use tether_buffer::Buffer;
//! use tether_protocol::{ChannelId, Message, ObjectCodec};
//!
//! let codec = ObjectCodec::default();
//! let mut buf = Buffer::new();
//! let join = Message::RequestJoinChannel {
//!     channel_id: ChannelId(5),
//!     password: "abc".into(),
//! };
//! join.encode(&codec, &mut buf).unwrap();
//!
//! assert_eq!(Message::decode(&codec, &mut buf).unwrap(), join);
//! ```

mod codec;
mod convert;
mod document;
mod error;
mod message;
mod packet;
mod text;
mod value;

pub use codec::{
    BinarySerializable, DEFAULT_MAX_DEPTH, Describe, ObjectCodec, read_count, read_string,
    write_count, write_string,
};
pub use convert::{FromValue, ValueType};
pub use document::{COMPRESSED_MAGIC, DataNode, DocumentFormat};
pub use error::ProtocolError;
pub use message::Message;
pub use packet::{ChannelId, FunctionAddress, PacketKind, PlayerId, PlayerInfo, Target};
pub use value::{
    Bounds, Color, Color32, CustomValue, MIXED_ELEMENT, Matrix4, ObjectValue, Quat, Sequence,
    SkinWeights, TypeTag, Value, Vec2, Vec3, Vec4,
};
