//! Configuration for a Tether client.
//!
//! Settings are plain structs with defaults. They can also be read from
//! a [`DataNode`] document, the same format used for everything else:
//!
//! ```text
//! tether
//! 	protocol_version = 2
//! 	player_name = "alice"
//! 	connect_timeout = 2.5
//! 	pool
//! 		initial_capacity = 512
//! ```
//!
//! Durations are seconds. Missing keys keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_protocol::DataNode;
use tether_transport::TransportConfig;

use crate::TetherError;

/// Settings for the client session on top of the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name requested during the handshake.
    pub player_name: String,

    /// How often [`Client::update`](crate::Client::update) sends a ping.
    pub ping_interval: Duration,

    /// Silence after which the connection is considered dead.
    pub keepalive_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_name: "player".to_string(),
            ping_interval: Duration::from_secs(2),
            keepalive_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything needed to open a client connection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetConfig {
    pub transport: TransportConfig,
    pub client: ClientConfig,
}

impl NetConfig {
    /// Reads settings from the children of `node`.
    pub fn from_document(node: &DataNode) -> Result<Self, TetherError> {
        let mut config = Self::default();
        let transport = &mut config.transport;
        let client = &mut config.client;

        if let Some(version) = node.child_value("protocol_version") {
            transport.protocol_version = version;
        }
        if let Some(name) = node.child_value("player_name") {
            client.player_name = name;
        }
        read_seconds(node, "connect_timeout", &mut transport.connect_timeout)?;
        read_seconds(node, "verify_timeout", &mut transport.verify_timeout)?;
        read_seconds(node, "ping_interval", &mut client.ping_interval)?;
        read_seconds(node, "keepalive_timeout", &mut client.keepalive_timeout)?;
        if let Some(size) = node.child_value("max_packet_size") {
            transport.max_packet_size = size;
        }
        read_size(node, "read_chunk_size", &mut transport.read_chunk_size)?;
        read_size(node, "pool/initial_capacity", &mut transport.pool.initial_capacity)?;
        read_size(node, "pool/max_resident_bytes", &mut transport.pool.max_resident_bytes)?;

        config.validate()?;
        Ok(config)
    }

    /// Loads settings from a document file in any of its forms.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TetherError> {
        let path = path.as_ref();
        let node = DataNode::load(path)?;
        let config = Self::from_document(&node)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Writes the settings as a document named `tether`.
    pub fn to_document(&self) -> DataNode {
        let transport = &self.transport;
        let client = &self.client;
        let mut node = DataNode::new("tether");
        node.add("protocol_version", transport.protocol_version);
        node.add("player_name", client.player_name.as_str());
        node.add("connect_timeout", transport.connect_timeout.as_secs_f64());
        node.add("verify_timeout", transport.verify_timeout.as_secs_f64());
        node.add("ping_interval", client.ping_interval.as_secs_f64());
        node.add("keepalive_timeout", client.keepalive_timeout.as_secs_f64());
        node.add("max_packet_size", transport.max_packet_size);
        node.add("read_chunk_size", transport.read_chunk_size as u64);
        let pool = node.add_child(DataNode::new("pool"));
        pool.add("initial_capacity", transport.pool.initial_capacity as u64);
        pool.add("max_resident_bytes", transport.pool.max_resident_bytes as u64);
        node
    }

    /// Checks values that would make the transport unusable.
    pub fn validate(&self) -> Result<(), TetherError> {
        if self.transport.max_packet_size == 0 {
            return Err(TetherError::Config("max_packet_size must be positive".into()));
        }
        if self.transport.read_chunk_size == 0 {
            return Err(TetherError::Config("read_chunk_size must be positive".into()));
        }
        if self.client.ping_interval.is_zero() {
            return Err(TetherError::Config("ping_interval must be positive".into()));
        }
        if self.client.keepalive_timeout <= self.client.ping_interval {
            return Err(TetherError::Config(
                "keepalive_timeout must be longer than ping_interval".into(),
            ));
        }
        Ok(())
    }
}

fn read_seconds(node: &DataNode, path: &str, target: &mut Duration) -> Result<(), TetherError> {
    if let Some(seconds) = node.child_value::<f64>(path) {
        *target = Duration::try_from_secs_f64(seconds)
            .map_err(|_| TetherError::Config(format!("{path} is not a valid duration: {seconds}")))?;
    }
    Ok(())
}

fn read_size(node: &DataNode, path: &str, target: &mut usize) -> Result<(), TetherError> {
    if let Some(size) = node.child_value::<u64>(path) {
        *target = usize::try_from(size)
            .map_err(|_| TetherError::Config(format!("{path} is too large: {size}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client.player_name, "player");
        assert_eq!(config.transport.protocol_version, 1);
    }

    #[test]
    fn test_from_document_reads_present_keys() {
        let text = "tether\n\
                    \tprotocol_version = 2\n\
                    \tplayer_name = \"alice\"\n\
                    \tconnect_timeout = 2.5\n\
                    \tping_interval = 1\n\
                    \tpool\n\
                    \t\tinitial_capacity = 512\n";
        let node = DataNode::read_text(text).unwrap();

        let config = NetConfig::from_document(&node).unwrap();

        assert_eq!(config.transport.protocol_version, 2);
        assert_eq!(config.client.player_name, "alice");
        assert_eq!(config.transport.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.client.ping_interval, Duration::from_secs(1));
        assert_eq!(config.transport.pool.initial_capacity, 512);
        // untouched keys keep defaults
        assert_eq!(config.transport.verify_timeout, Duration::from_secs(10));
        assert_eq!(config.transport.pool.max_resident_bytes, 1024);
    }

    #[test]
    fn test_to_document_round_trips_through_text() {
        let mut config = NetConfig::default();
        config.client.player_name = "bob".into();
        config.transport.max_packet_size = 4096;
        config.client.keepalive_timeout = Duration::from_millis(7500);

        let text = config.to_document().to_string();
        let node = DataNode::read_text(&text).unwrap();

        assert_eq!(NetConfig::from_document(&node).unwrap(), config);
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let node = DataNode::read_text("tether\n\tconnect_timeout = -1\n").unwrap();
        assert!(matches!(
            NetConfig::from_document(&node),
            Err(TetherError::Config(_))
        ));
    }

    #[test]
    fn test_keepalive_must_outlast_ping_interval() {
        let mut config = NetConfig::default();
        config.client.keepalive_timeout = config.client.ping_interval;
        assert!(matches!(config.validate(), Err(TetherError::Config(_))));
    }
}
