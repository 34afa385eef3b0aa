//! Connection stages and the version handshake.
//!
//! [`Handshake`] is a pure state machine: it is fed decoded packets and
//! answers with a [`Step`] telling the socket code what to do. It never
//! touches a socket, so both sides of the handshake are testable without
//! one.

use serde::{Deserialize, Serialize};
use tether_protocol::{DataNode, Message, PacketKind, PlayerId};

use crate::TransportError;

// ---------------------------------------------------------------------------
// ConnectionStage
// ---------------------------------------------------------------------------

/// The lifecycle stage of a connection.
///
/// ```text
/// NotConnected → Connecting → Verifying → Connected
///       ↑____________|____________|___________|
/// ```
///
/// - **Connecting**: the socket connect is in progress.
/// - **Verifying**: the socket is open and the version handshake is
///   running. Only handshake packets are accepted.
/// - **Connected**: the peer accepted our protocol version.
///
/// Any failure, timeout, or explicit disconnect returns to
/// `NotConnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStage {
    NotConnected,
    Connecting,
    Verifying,
    Connected,
}

impl ConnectionStage {
    /// Returns `true` once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// The stage reached when the current one succeeds.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::NotConnected => Some(Self::Connecting),
            Self::Connecting => Some(Self::Verifying),
            Self::Verifying => Some(Self::Connected),
            Self::Connected => None,
        }
    }

    /// Returns `true` if moving to `target` is valid: either the next
    /// stage in order, or back to `NotConnected` from anywhere else.
    pub fn can_transition_to(self, target: Self) -> bool {
        if target == Self::NotConnected {
            return self != Self::NotConnected;
        }
        self.next() == Some(target)
    }
}

impl std::fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "NotConnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Verifying => write!(f, "Verifying"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// What the connection should do with a packet after the handshake has
/// seen it.
#[derive(Debug)]
pub enum Step {
    /// The connection is open; hand the packet to the consumer.
    Deliver,
    /// The handshake completed. `reply` must be sent before any other
    /// packet.
    Accepted {
        player_id: PlayerId,
        reply: Option<Message>,
    },
    /// The handshake failed. Send `replies`, then close with `error`.
    Rejected {
        error: TransportError,
        replies: Vec<Message>,
    },
    /// The connection is not open; drop the packet.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server { player_id: PlayerId },
}

/// Drives one side of the version handshake.
///
/// The client sends `RequestId` with its protocol version and requested
/// name. The server answers `ResponseId` with the assigned player id, or
/// with its own version followed by an `Error` when the versions differ.
#[derive(Debug, Clone)]
pub struct Handshake {
    role: Role,
    version: u32,
    stage: ConnectionStage,
    peer_name: Option<String>,
}

impl Handshake {
    /// A client handshake, not yet connecting.
    pub fn client(version: u32) -> Self {
        Self {
            role: Role::Client,
            version,
            stage: ConnectionStage::NotConnected,
            peer_name: None,
        }
    }

    /// A server handshake for a freshly accepted socket. It starts in
    /// `Verifying` and will hand out `player_id` on success.
    pub fn server(version: u32, player_id: PlayerId) -> Self {
        Self {
            role: Role::Server { player_id },
            version,
            stage: ConnectionStage::Verifying,
            peer_name: None,
        }
    }

    pub fn stage(&self) -> ConnectionStage {
        self.stage
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The name the client asked for, once a server has seen `RequestId`.
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// Moves a client from `NotConnected` to `Connecting`.
    ///
    /// Returns `false` if a connect is already under way.
    pub fn start_connect(&mut self) -> bool {
        self.advance(ConnectionStage::Connecting)
    }

    /// Records that the socket connected and returns the bootstrap packet
    /// to send.
    pub fn connected(&mut self, name: impl Into<String>, data: Option<DataNode>) -> Message {
        self.advance(ConnectionStage::Verifying);
        Message::RequestId {
            version: self.version,
            name: name.into(),
            data,
        }
    }

    /// Returns to `NotConnected`.
    pub fn fail(&mut self) {
        self.stage = ConnectionStage::NotConnected;
    }

    /// Feeds one decoded packet through the handshake.
    pub fn receive(&mut self, message: &Message) -> Step {
        match self.stage {
            ConnectionStage::Connected => Step::Deliver,
            ConnectionStage::NotConnected | ConnectionStage::Connecting => Step::Discard,
            ConnectionStage::Verifying => match self.role {
                Role::Server { player_id } => self.verify_client(player_id, message),
                Role::Client => self.verify_server(message),
            },
        }
    }

    fn verify_client(&mut self, player_id: PlayerId, message: &Message) -> Step {
        let Message::RequestId { version, name, .. } = message else {
            self.fail();
            let text = format!("expected {} during verification", PacketKind::RequestId);
            return Step::Rejected {
                replies: vec![Message::Error(text.clone())],
                error: TransportError::Rejected(text),
            };
        };

        if *version != self.version {
            self.fail();
            let error = TransportError::VersionMismatch {
                local: self.version,
                remote: *version,
            };
            return Step::Rejected {
                replies: vec![
                    Message::ResponseId {
                        version: self.version,
                        player_id: PlayerId(0),
                    },
                    Message::Error(error.to_string()),
                ],
                error,
            };
        }

        self.peer_name = Some(name.clone());
        self.advance(ConnectionStage::Connected);
        Step::Accepted {
            player_id,
            reply: Some(Message::ResponseId {
                version: self.version,
                player_id,
            }),
        }
    }

    fn verify_server(&mut self, message: &Message) -> Step {
        match message {
            Message::ResponseId { version, player_id } if *version == self.version => {
                self.advance(ConnectionStage::Connected);
                Step::Accepted {
                    player_id: *player_id,
                    reply: None,
                }
            }
            Message::ResponseId { version, .. } => {
                self.fail();
                Step::Rejected {
                    error: TransportError::VersionMismatch {
                        local: self.version,
                        remote: *version,
                    },
                    replies: Vec::new(),
                }
            }
            Message::Error(text) => {
                self.fail();
                Step::Rejected {
                    error: TransportError::Rejected(text.clone()),
                    replies: Vec::new(),
                }
            }
            other => {
                self.fail();
                Step::Rejected {
                    error: TransportError::Rejected(format!(
                        "unexpected {} during verification",
                        other.kind()
                    )),
                    replies: Vec::new(),
                }
            }
        }
    }

    fn advance(&mut self, target: ConnectionStage) -> bool {
        if self.stage.can_transition_to(target) {
            self.stage = target;
            true
        } else {
            false
        }
    }
}
