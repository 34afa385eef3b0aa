//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_buffer::PoolConfig;

/// Settings shared by the stream and datagram transports.
///
/// Passed to every constructor; there is no process-wide protocol
/// version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Version sent in the bootstrap packet. Peers with a different
    /// version are rejected.
    pub protocol_version: u32,

    /// How long a connect attempt may take to reach `Verifying`.
    pub connect_timeout: Duration,

    /// How long a connection may stay in `Verifying`.
    pub verify_timeout: Duration,

    /// Largest packet body a length prefix may announce.
    pub max_packet_size: u32,

    /// Bytes requested from the socket per read.
    pub read_chunk_size: usize,

    /// Sizing for pooled buffers.
    pub pool: PoolConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            connect_timeout: Duration::from_secs(5),
            verify_timeout: Duration::from_secs(10),
            max_packet_size: 16 * 1024 * 1024,
            read_chunk_size: 8 * 1024,
            pool: PoolConfig::default(),
        }
    }
}
