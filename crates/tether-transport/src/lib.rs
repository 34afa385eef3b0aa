//! Transport layer for Tether.
//!
//! Moves length-prefixed packets between peers. Every packet that comes
//! in or goes out lives in a pooled [`Buffer`](tether_buffer::Buffer).
//!
//! - [`FrameDecoder`]: recovers packet boundaries from a byte stream.
//! - [`ConnectionStage`] and [`Handshake`]: the connection state machine
//!   and the version handshake that drives it.
//! - [`TcpTransport`] / [`TcpConnection`]: the persistent stream
//!   transport, with one write in flight per connection.
//! - [`UdpTransport`]: connectionless datagrams and LAN broadcast.

#![allow(async_fn_in_trait)]

mod config;
mod error;
mod framing;
mod stage;
mod tcp;
mod udp;

pub use config::TransportConfig;
pub use error::TransportError;
pub use framing::{FrameDecoder, FrameStatus};
pub use stage::{ConnectionStage, Handshake, Step};
pub use tcp::{TcpConnection, TcpTransport};
pub use udp::UdpTransport;

use std::fmt;

use tether_buffer::{Buffer, Pooled, Shared};

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops accepting new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single connection that carries whole packets.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Queues a finished packet for sending.
    async fn send(&self, packet: Shared<Buffer>) -> Result<(), Self::Error>;

    /// Waits for the next inbound packet.
    ///
    /// Returns `Ok(None)` once the connection is closed and every queued
    /// packet, including the final `Disconnect`, has been taken.
    async fn recv(&self) -> Result<Option<Pooled<Buffer>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "alice");
        map.insert(ConnectionId::new(2), "bob");
        assert_eq!(map[&ConnectionId::new(1)], "alice");
    }
}
