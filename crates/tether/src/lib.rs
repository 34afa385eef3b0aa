//! # Tether
//!
//! Client networking for multiplayer channels.
//!
//! Tether moves length-prefixed packets over TCP (and UDP for discovery),
//! encodes values with a compact tagged binary codec, and stores
//! structured data as hierarchical documents in text, binary, or
//! compressed form. This crate ties the layers together behind a
//! [`Client`] that joins channels, creates objects, and forwards remote
//! function calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! # async fn run() -> Result<(), TetherError> {
//! let mut config = NetConfig::default();
//! config.client.player_name = "alice".into();
//!
//! let mut client = Client::connect("127.0.0.1:5127", config).await?;
//! client.join_channel(ChannelId(5), "abc")?;
//!
//! for event in client.wait_for_events().await {
//!     if let ClientEvent::ChannelJoined { players, .. } = event {
//!         println!("{} other players", players.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod logging;

pub use client::{Client, ClientEvent, Session};
pub use config::{ClientConfig, NetConfig};
pub use error::TetherError;
pub use logging::init_tracing;

pub use tether_buffer as buffer;
pub use tether_protocol as protocol;
pub use tether_transport as transport;

/// The types most applications need.
pub mod prelude {
    pub use crate::{Client, ClientConfig, ClientEvent, NetConfig, Session, TetherError};
    pub use tether_buffer::{Buffer, BufferPool, PoolConfig, buffer_pool};
    pub use tether_protocol::{
        ChannelId, DataNode, DocumentFormat, FunctionAddress, Message, PlayerId, PlayerInfo,
        Target, Value,
    };
    pub use tether_transport::{
        ConnectionStage, TcpConnection, TcpTransport, Transport, TransportConfig,
        UdpTransport,
    };
}
