//! Client session over a TCP connection.
//!
//! [`Client`] turns inbound packets into [`ClientEvent`]s and outbound
//! commands into packets. Packet bookkeeping that needs no socket lives
//! in [`Session`] so it can be driven directly in tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tether_buffer::buffer_pool;
use tether_protocol::{
    ChannelId, FunctionAddress, Message, PlayerId, PlayerInfo, Target, Value,
};
use tether_transport::{ConnectionStage, TcpConnection, TransportError};
use tokio::net::ToSocketAddrs;
use tracing::{debug, info, trace, warn};

use crate::{NetConfig, TetherError};

// ---------------------------------------------------------------------------
// ClientEvent
// ---------------------------------------------------------------------------

/// Something that happened on the connection, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// We joined a channel. `players` lists everyone already in it, in
    /// the order the server sent them.
    ChannelJoined {
        channel_id: ChannelId,
        players: Vec<PlayerInfo>,
    },
    ChannelJoinFailed {
        channel_id: ChannelId,
        message: String,
    },
    ChannelLeft {
        channel_id: ChannelId,
    },
    PlayerJoined {
        channel_id: ChannelId,
        player: PlayerInfo,
    },
    PlayerLeft {
        channel_id: ChannelId,
        player_id: PlayerId,
    },
    PlayerRenamed {
        player_id: PlayerId,
        name: String,
    },
    HostChanged {
        channel_id: ChannelId,
        player_id: PlayerId,
    },
    ObjectCreated {
        channel_id: ChannelId,
        creator: PlayerId,
        object_id: u32,
        prefab: String,
        args: Vec<Value>,
    },
    ObjectsDestroyed {
        channel_id: ChannelId,
        object_ids: Vec<u32>,
    },
    FileLoaded {
        file_name: String,
        data: Vec<u8>,
    },
    /// A remote function call relayed by the server.
    Forwarded {
        target: Target,
        address: FunctionAddress,
        args: Vec<Value>,
    },
    /// A reply to our last ping.
    Pong {
        rtt: Duration,
    },
    /// The server or the transport reported an error.
    Error(String),
    /// The connection is gone. Reported exactly once.
    Disconnected,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Client-side view of the session: who we are and which channels we
/// are in.
#[derive(Debug, Clone)]
pub struct Session {
    player_id: PlayerId,
    name: String,
    channels: HashMap<ChannelId, Vec<PlayerInfo>>,
    // player lists received ahead of the join result
    pending_joins: HashMap<ChannelId, Vec<PlayerInfo>>,
    ping_sent: Option<Instant>,
    disconnected: bool,
}

impl Session {
    pub fn new(player_id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            player_id,
            name: name.into(),
            channels: HashMap::new(),
            pending_joins: HashMap::new(),
            ping_sent: None,
            disconnected: false,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_in_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.contains_key(&channel_id)
    }

    /// The other players in a channel we have joined.
    pub fn players(&self, channel_id: ChannelId) -> Option<&[PlayerInfo]> {
        self.channels.get(&channel_id).map(Vec::as_slice)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Records that a ping left at `at`.
    pub fn ping_sent(&mut self, at: Instant) {
        self.ping_sent = Some(at);
    }

    /// Applies one inbound message and returns the event it produces,
    /// if any.
    pub fn handle(&mut self, message: Message, now: Instant) -> Option<ClientEvent> {
        match message {
            Message::ResponseJoiningChannel {
                channel_id,
                players,
            } => {
                self.pending_joins.insert(channel_id, players);
                None
            }
            Message::ResponseJoinChannel {
                channel_id,
                success: true,
                ..
            } => match self.pending_joins.remove(&channel_id) {
                Some(players) => {
                    self.channels.insert(channel_id, players.clone());
                    Some(ClientEvent::ChannelJoined {
                        channel_id,
                        players,
                    })
                }
                None if self.channels.contains_key(&channel_id) => {
                    debug!(%channel_id, "repeated join confirmation ignored");
                    None
                }
                None => {
                    self.channels.insert(channel_id, Vec::new());
                    Some(ClientEvent::ChannelJoined {
                        channel_id,
                        players: Vec::new(),
                    })
                }
            },
            Message::ResponseJoinChannel {
                channel_id,
                message,
                ..
            } => {
                self.pending_joins.remove(&channel_id);
                Some(ClientEvent::ChannelJoinFailed {
                    channel_id,
                    message,
                })
            }
            Message::ResponseLeaveChannel { channel_id } => {
                self.pending_joins.remove(&channel_id);
                self.channels
                    .remove(&channel_id)
                    .map(|_| ClientEvent::ChannelLeft { channel_id })
            }
            Message::ResponsePlayerJoined { channel_id, player } => {
                if let Some(players) = self.channels.get_mut(&channel_id) {
                    players.retain(|p| p.id != player.id);
                    players.push(player.clone());
                }
                Some(ClientEvent::PlayerJoined { channel_id, player })
            }
            Message::ResponsePlayerLeft {
                channel_id,
                player_id,
            } => {
                if let Some(players) = self.channels.get_mut(&channel_id) {
                    players.retain(|p| p.id != player_id);
                }
                Some(ClientEvent::PlayerLeft {
                    channel_id,
                    player_id,
                })
            }
            Message::ResponseRenamePlayer { player_id, name } => {
                if player_id == self.player_id {
                    self.name = name.clone();
                }
                for player in self.channels.values_mut().flatten() {
                    if player.id == player_id {
                        player.name = name.clone();
                    }
                }
                Some(ClientEvent::PlayerRenamed { player_id, name })
            }
            Message::ResponseSetHost {
                channel_id,
                player_id,
            } => Some(ClientEvent::HostChanged {
                channel_id,
                player_id,
            }),
            Message::ResponseCreateObject {
                channel_id,
                creator,
                object_id,
                prefab,
                args,
            } => Some(ClientEvent::ObjectCreated {
                channel_id,
                creator,
                object_id,
                prefab,
                args,
            }),
            Message::ResponseDestroyObject {
                channel_id,
                object_ids,
            } => Some(ClientEvent::ObjectsDestroyed {
                channel_id,
                object_ids,
            }),
            Message::ResponseLoadFile { file_name, data } => {
                Some(ClientEvent::FileLoaded { file_name, data })
            }
            Message::Forward {
                target,
                address,
                args,
            } => Some(ClientEvent::Forwarded {
                target,
                address,
                args,
            }),
            Message::ResponsePing => {
                let sent = self.ping_sent.take()?;
                Some(ClientEvent::Pong {
                    rtt: now.saturating_duration_since(sent),
                })
            }
            Message::Error(text) => Some(ClientEvent::Error(text)),
            Message::Disconnect => self.disconnect(),
            other => {
                trace!(kind = %other.kind(), "ignoring packet");
                None
            }
        }
    }

    /// Marks the session closed. Returns the `Disconnected` event the
    /// first time only.
    pub fn disconnect(&mut self) -> Option<ClientEvent> {
        if self.disconnected {
            return None;
        }
        self.disconnected = true;
        self.channels.clear();
        self.pending_joins.clear();
        Some(ClientEvent::Disconnected)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A connected client.
///
/// Call [`poll`](Self::poll) or [`wait_for_events`](Self::wait_for_events)
/// from the application loop, and [`update`](Self::update) periodically
/// to keep the connection alive.
pub struct Client {
    connection: TcpConnection,
    config: NetConfig,
    session: Session,
    next_ping: Instant,
}

impl Client {
    /// Connects and completes the handshake.
    pub async fn connect(addr: impl ToSocketAddrs, config: NetConfig) -> Result<Self, TetherError> {
        config.validate()?;
        let pool = buffer_pool(config.transport.pool);
        let connection = TcpConnection::connect(
            addr,
            config.transport.clone(),
            pool,
            &config.client.player_name,
        )
        .await?;
        let player_id = connection
            .player_id()
            .ok_or(TransportError::NotConnected)?;
        info!(%player_id, remote = %connection.remote_addr(), "client connected");

        let session = Session::new(player_id, config.client.player_name.clone());
        let next_ping = Instant::now() + config.client.ping_interval;
        Ok(Self {
            connection,
            config,
            session,
            next_ping,
        })
    }

    pub fn player_id(&self) -> PlayerId {
        self.session.player_id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stage(&self) -> ConnectionStage {
        self.connection.stage()
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn connection(&self) -> &TcpConnection {
        &self.connection
    }

    // -- Commands --

    pub fn join_channel(&self, channel_id: ChannelId, password: &str) -> Result<(), TetherError> {
        self.send_message(Message::RequestJoinChannel {
            channel_id,
            password: password.to_string(),
        })
    }

    pub fn leave_channel(&self, channel_id: ChannelId) -> Result<(), TetherError> {
        self.send_message(Message::RequestLeaveChannel { channel_id })
    }

    pub fn close_channel(&self, channel_id: ChannelId) -> Result<(), TetherError> {
        self.send_message(Message::RequestCloseChannel { channel_id })
    }

    pub fn set_name(&self, name: &str) -> Result<(), TetherError> {
        self.send_message(Message::RequestSetName {
            name: name.to_string(),
        })
    }

    pub fn set_host(&self, channel_id: ChannelId, player_id: PlayerId) -> Result<(), TetherError> {
        self.send_message(Message::RequestSetHost {
            channel_id,
            player_id,
        })
    }

    pub fn create_object(
        &self,
        channel_id: ChannelId,
        prefab: &str,
        persistent: bool,
        args: Vec<Value>,
    ) -> Result<(), TetherError> {
        self.send_message(Message::RequestCreateObject {
            channel_id,
            prefab: prefab.to_string(),
            persistent,
            args,
        })
    }

    pub fn destroy_object(&self, channel_id: ChannelId, object_id: u32) -> Result<(), TetherError> {
        self.send_message(Message::RequestDestroyObject {
            channel_id,
            object_id,
        })
    }

    pub fn save_file(&self, file_name: &str, data: Vec<u8>) -> Result<(), TetherError> {
        self.send_message(Message::RequestSaveFile {
            file_name: file_name.to_string(),
            data,
        })
    }

    pub fn load_file(&self, file_name: &str) -> Result<(), TetherError> {
        self.send_message(Message::RequestLoadFile {
            file_name: file_name.to_string(),
        })
    }

    /// Calls a remote function on the players `target` selects.
    pub fn send(
        &self,
        target: Target,
        address: FunctionAddress,
        args: Vec<Value>,
    ) -> Result<(), TetherError> {
        self.send_message(Message::Forward {
            target,
            address,
            args,
        })
    }

    pub fn ping(&mut self) -> Result<(), TetherError> {
        self.session.ping_sent(Instant::now());
        self.send_message(Message::RequestPing)
    }

    /// Closes the connection. The next poll reports `Disconnected`.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    fn send_message(&self, message: Message) -> Result<(), TetherError> {
        self.connection.send_message(&message)?;
        Ok(())
    }

    // -- Events --

    /// Handles every packet already received, without waiting.
    pub fn poll(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Some(mut packet) = self.connection.receive_packet() {
            match Message::decode(self.connection.codec(), &mut packet) {
                Ok(message) => self.handle(message, &mut events),
                Err(e) => warn!(error = %e, "dropping undecodable packet"),
            }
        }
        events
    }

    /// Waits until at least one event is available, then returns every
    /// event that is ready.
    ///
    /// After `Disconnected` has been reported this returns an empty list
    /// immediately.
    pub async fn wait_for_events(&mut self) -> Vec<ClientEvent> {
        loop {
            let events = self.poll();
            if !events.is_empty() {
                return events;
            }
            if self.session.is_disconnected() {
                return events;
            }

            let Some(mut packet) = self.connection.next_packet().await else {
                return self.session.disconnect().into_iter().collect();
            };
            let mut events = Vec::new();
            match Message::decode(self.connection.codec(), &mut packet) {
                Ok(message) => self.handle(message, &mut events),
                Err(e) => warn!(error = %e, "dropping undecodable packet"),
            }
            events.extend(self.poll());
            if !events.is_empty() {
                return events;
            }
        }
    }

    /// Sends keepalive pings and closes a silent connection.
    pub fn update(&mut self, now: Instant) -> Result<(), TetherError> {
        if self.session.is_disconnected() || !self.stage().is_connected() {
            return Ok(());
        }
        if self
            .connection
            .is_timed_out(now, self.config.client.keepalive_timeout)
        {
            warn!(player_id = %self.player_id(), "keepalive timed out");
            self.connection.disconnect();
            return Ok(());
        }
        if now >= self.next_ping {
            self.next_ping = now + self.config.client.ping_interval;
            self.ping()?;
        }
        Ok(())
    }

    fn handle(&mut self, message: Message, events: &mut Vec<ClientEvent>) {
        if message == Message::RequestPing {
            if let Err(e) = self.connection.send_message(&Message::ResponsePing) {
                debug!(error = %e, "could not answer ping");
            }
            return;
        }
        if let Some(event) = self.session.handle(message, Instant::now()) {
            events.push(event);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(PlayerId(1), "alice")
    }

    fn players() -> Vec<PlayerInfo> {
        vec![PlayerInfo::new(PlayerId(2), "bob"), PlayerInfo::new(PlayerId(3), "carol")]
    }

    // =====================================================================
    // Channel join
    // =====================================================================

    #[test]
    fn test_channel_joined_fires_once_with_players() {
        let mut session = session();
        let now = Instant::now();
        let channel_id = ChannelId(5);

        assert_eq!(
            session.handle(
                Message::ResponseJoiningChannel {
                    channel_id,
                    players: players()
                },
                now
            ),
            None
        );
        let joined = Message::ResponseJoinChannel {
            channel_id,
            success: true,
            message: String::new(),
        };
        assert_eq!(
            session.handle(joined.clone(), now),
            Some(ClientEvent::ChannelJoined {
                channel_id,
                players: players()
            })
        );
        assert_eq!(session.handle(joined, now), None);
        assert_eq!(session.players(channel_id), Some(players().as_slice()));
    }

    #[test]
    fn test_failed_join_drops_pending_players() {
        let mut session = session();
        let now = Instant::now();
        session.handle(
            Message::ResponseJoiningChannel {
                channel_id: ChannelId(5),
                players: players(),
            },
            now,
        );

        let event = session.handle(
            Message::ResponseJoinChannel {
                channel_id: ChannelId(5),
                success: false,
                message: "wrong password".into(),
            },
            now,
        );

        assert_eq!(
            event,
            Some(ClientEvent::ChannelJoinFailed {
                channel_id: ChannelId(5),
                message: "wrong password".into()
            })
        );
        assert!(!session.is_in_channel(ChannelId(5)));
    }

    #[test]
    fn test_leave_reports_only_joined_channels() {
        let mut session = session();
        let now = Instant::now();
        let leave = Message::ResponseLeaveChannel {
            channel_id: ChannelId(8),
        };
        assert_eq!(session.handle(leave.clone(), now), None);

        session.handle(
            Message::ResponseJoinChannel {
                channel_id: ChannelId(8),
                success: true,
                message: String::new(),
            },
            now,
        );
        assert_eq!(
            session.handle(leave, now),
            Some(ClientEvent::ChannelLeft {
                channel_id: ChannelId(8)
            })
        );
    }

    // =====================================================================
    // Membership
    // =====================================================================

    #[test]
    fn test_player_join_leave_and_rename_update_channel() {
        let mut session = session();
        let now = Instant::now();
        let channel_id = ChannelId(1);
        session.handle(
            Message::ResponseJoinChannel {
                channel_id,
                success: true,
                message: String::new(),
            },
            now,
        );

        session.handle(
            Message::ResponsePlayerJoined {
                channel_id,
                player: PlayerInfo::new(PlayerId(4), "dave"),
            },
            now,
        );
        session.handle(
            Message::ResponseRenamePlayer {
                player_id: PlayerId(4),
                name: "david".into(),
            },
            now,
        );
        assert_eq!(session.players(channel_id).unwrap()[0].name, "david");

        session.handle(
            Message::ResponsePlayerLeft {
                channel_id,
                player_id: PlayerId(4),
            },
            now,
        );
        assert!(session.players(channel_id).unwrap().is_empty());
    }

    #[test]
    fn test_rename_of_self_updates_name() {
        let mut session = session();
        session.handle(
            Message::ResponseRenamePlayer {
                player_id: PlayerId(1),
                name: "alicia".into(),
            },
            Instant::now(),
        );
        assert_eq!(session.name(), "alicia");
    }

    // =====================================================================
    // Ping and disconnect
    // =====================================================================

    #[test]
    fn test_pong_measures_round_trip() {
        let mut session = session();
        let sent = Instant::now();
        session.ping_sent(sent);

        let event = session.handle(Message::ResponsePing, sent + Duration::from_millis(40));
        assert_eq!(
            event,
            Some(ClientEvent::Pong {
                rtt: Duration::from_millis(40)
            })
        );
        // unsolicited pong
        assert_eq!(session.handle(Message::ResponsePing, sent), None);
    }

    #[test]
    fn test_disconnected_fires_once() {
        let mut session = session();
        let now = Instant::now();
        assert_eq!(
            session.handle(Message::Disconnect, now),
            Some(ClientEvent::Disconnected)
        );
        assert_eq!(session.handle(Message::Disconnect, now), None);
        assert_eq!(session.disconnect(), None);
        assert!(session.is_disconnected());
    }

    #[test]
    fn test_error_becomes_event() {
        let mut session = session();
        assert_eq!(
            session.handle(Message::Error("boom".into()), Instant::now()),
            Some(ClientEvent::Error("boom".into()))
        );
    }
}
