use tether_buffer::BufferError;
use tether_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
///
/// Errors raised inside a connection's background tasks never escape as
/// panics. They close the connection and reach the consumer as a
/// synthesized `Error` packet followed by a single `Disconnect`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Opening an outgoing connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// A connection stage did not finish in time.
    #[error("timed out while {0}")]
    Timeout(&'static str),

    /// The peers speak different protocol versions. Never retried.
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    /// The peer refused the connection.
    #[error("rejected by peer: {0}")]
    Rejected(String),

    /// The connection is not open.
    #[error("not connected")]
    NotConnected,

    /// A length prefix announced a packet larger than allowed.
    #[error("packet of {length} bytes exceeds the limit of {max}")]
    PacketTooLarge { length: u32, max: u32 },

    /// A packet could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A buffer operation failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
