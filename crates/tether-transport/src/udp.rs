//! Connectionless transport over UDP.
//!
//! Every datagram the network delivers is whole, so framing runs on each
//! one independently: a datagram carrying several packets yields several
//! [`Datagram`]s, and a trailing partial packet is dropped. There is no
//! ordering guarantee across datagrams.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tether_buffer::{Buffer, Datagram, DatagramPool, Pooled};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::{FrameDecoder, FrameStatus, TransportConfig, TransportError};

/// Largest payload a single UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_536;

/// A bound UDP socket that sends packets and frames received datagrams.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    config: TransportConfig,
    datagrams: DatagramPool,
    scratch: Vec<u8>,
    received: VecDeque<Pooled<Datagram>>,
}

impl UdpTransport {
    /// Binds to `port` on every local interface. Port 0 picks a free one.
    pub async fn bind(
        port: u16,
        config: TransportConfig,
        datagrams: DatagramPool,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local = socket.local_addr().map_err(TransportError::AcceptFailed)?;
        info!(%local, "UDP transport listening");
        Ok(Self {
            socket,
            config,
            datagrams,
            scratch: vec![0; MAX_DATAGRAM],
            received: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(TransportError::AcceptFailed)
    }

    pub fn datagrams(&self) -> &DatagramPool {
        &self.datagrams
    }

    /// Sends one finished packet to `endpoint`.
    pub async fn send(&self, packet: &Buffer, endpoint: SocketAddr) -> Result<(), TransportError> {
        let bytes = packet.as_slice();
        let sent = self
            .socket
            .send_to(bytes, endpoint)
            .await
            .map_err(TransportError::SendFailed)?;
        if sent != bytes.len() {
            return Err(TransportError::SendFailed(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {sent} of {} bytes", bytes.len()),
            )));
        }
        trace!(%endpoint, bytes = sent, "datagram sent");
        Ok(())
    }

    /// Sends a datagram to the endpoint it carries.
    pub async fn send_datagram(&self, datagram: &Datagram) -> Result<(), TransportError> {
        match (datagram.buffer(), datagram.endpoint()) {
            (Some(buffer), Some(endpoint)) => self.send(buffer, endpoint).await,
            _ => Err(TransportError::SendFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "datagram has no payload or endpoint",
            ))),
        }
    }

    /// Fires `packet` at every listener on `port` of the local network.
    pub async fn broadcast(&self, packet: &Buffer, port: u16) -> Result<(), TransportError> {
        self.socket
            .set_broadcast(true)
            .map_err(TransportError::SendFailed)?;
        let endpoint = SocketAddr::from((Ipv4Addr::BROADCAST, port));
        debug!(port, bytes = packet.size(), "broadcasting");
        self.send(packet, endpoint).await
    }

    /// Takes the next received packet without waiting.
    pub fn receive(&mut self) -> Option<Pooled<Datagram>> {
        if let Some(datagram) = self.received.pop_front() {
            return Some(datagram);
        }
        loop {
            match self.socket.try_recv_from(&mut self.scratch) {
                Ok((len, endpoint)) => {
                    self.frame(len, endpoint);
                    if let Some(datagram) = self.received.pop_front() {
                        return Some(datagram);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    debug!(error = %e, "UDP receive failed");
                    return None;
                }
            }
        }
    }

    /// Waits for the next received packet.
    pub async fn next_datagram(&mut self) -> Result<Pooled<Datagram>, TransportError> {
        loop {
            if let Some(datagram) = self.received.pop_front() {
                return Ok(datagram);
            }
            let (len, endpoint) = self
                .socket
                .recv_from(&mut self.scratch)
                .await
                .map_err(TransportError::ReceiveFailed)?;
            self.frame(len, endpoint);
        }
    }

    fn frame(&mut self, len: usize, endpoint: SocketAddr) {
        let mut decoder = FrameDecoder::new(
            self.datagrams.buffers().clone(),
            self.config.max_packet_size,
        );
        let mut packets = Vec::new();
        match decoder.push(&self.scratch[..len], &mut packets) {
            Ok(FrameStatus::Open) => {}
            Ok(FrameStatus::Closed) => {
                trace!(%endpoint, "zero length prefix in datagram");
            }
            Err(e) => {
                warn!(%endpoint, error = %e, "dropping malformed datagram");
                return;
            }
        }
        if decoder.pending_bytes() > 0 {
            warn!(%endpoint, bytes = decoder.pending_bytes(), "dropping partial packet at end of datagram");
        }
        for packet in packets {
            self.received.push_back(self.datagrams.wrap(packet, endpoint));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(kind: u8, payload: &[u8]) -> Buffer {
        let mut buf = Buffer::new();
        buf.begin_packet(kind).write_bytes(payload);
        buf.end_packet().unwrap();
        buf
    }

    #[tokio::test]
    async fn test_send_and_receive_over_loopback() {
        let config = TransportConfig::default();
        let sender = UdpTransport::bind(0, config.clone(), DatagramPool::default())
            .await
            .unwrap();
        let mut receiver = UdpTransport::bind(0, config, DatagramPool::default())
            .await
            .unwrap();
        let port = receiver.local_addr().unwrap().port();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        sender.send(&packet(5, b"ping"), target).await.unwrap();
        let datagram = receiver.next_datagram().await.unwrap();

        assert_eq!(
            datagram.buffer().unwrap().as_slice(),
            packet(5, b"ping").as_slice()
        );
        assert_eq!(
            datagram.endpoint().unwrap().port(),
            sender.local_addr().unwrap().port()
        );
    }

    #[tokio::test]
    async fn test_datagram_with_several_packets_yields_each() {
        let config = TransportConfig::default();
        let sender = UdpTransport::bind(0, config.clone(), DatagramPool::default())
            .await
            .unwrap();
        let mut receiver = UdpTransport::bind(0, config, DatagramPool::default())
            .await
            .unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, receiver.local_addr().unwrap().port()));

        let mut both = packet(1, b"a");
        both.begin_write(true).write_bytes(packet(2, b"bc").as_slice());
        both.end_write();
        // trailing partial packet
        both.begin_write(true).write_bytes(&[9, 0, 0, 0, 3]);
        both.end_write();
        sender.send(&both, target).await.unwrap();

        let first = receiver.next_datagram().await.unwrap();
        let second = receiver.next_datagram().await.unwrap();
        assert_eq!(first.buffer().unwrap().packet_kind(), Some(1));
        assert_eq!(second.buffer().unwrap().packet_kind(), Some(2));
        assert!(receiver.receive().is_none());
    }

    #[tokio::test]
    async fn test_send_datagram_needs_endpoint() {
        let transport = UdpTransport::bind(0, TransportConfig::default(), DatagramPool::default())
            .await
            .unwrap();
        let empty = Datagram::default();
        assert!(matches!(
            transport.send_datagram(&empty).await,
            Err(TransportError::SendFailed(_))
        ));
    }
}
