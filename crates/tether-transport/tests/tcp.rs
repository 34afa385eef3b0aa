//! End-to-end tests for the TCP transport over loopback.

use std::time::Duration;

use tether_buffer::{Buffer, BufferPool, PoolConfig, buffer_pool};
use tether_protocol::{Message, ObjectCodec, PlayerId};
use tether_transport::{
    ConnectionStage, TcpConnection, TcpTransport, Transport, TransportConfig, TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn config(version: u32) -> TransportConfig {
    TransportConfig {
        protocol_version: version,
        ..TransportConfig::default()
    }
}

async fn listen(config: TransportConfig) -> (TcpTransport, BufferPool) {
    let pool = buffer_pool(PoolConfig::default());
    let transport = TcpTransport::bind("127.0.0.1:0", config, pool.clone())
        .await
        .unwrap();
    (transport, pool)
}

async fn pair(version: u32) -> (TcpConnection, TcpConnection) {
    let (mut transport, pool) = listen(config(version)).await;
    let addr = transport.local_addr().unwrap();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });
    let client = TcpConnection::connect(addr, config(version), pool, "alice")
        .await
        .unwrap();
    (client, accept.await.unwrap())
}

async fn next(connection: &TcpConnection) -> Message {
    tokio::time::timeout(Duration::from_secs(5), connection.next_message())
        .await
        .expect("packet in time")
        .expect("connection still has packets")
        .expect("packet decodes")
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_matching_versions_reach_connected() {
    let (client, server) = pair(4).await;

    assert_eq!(client.stage(), ConnectionStage::Connected);
    assert_eq!(server.stage(), ConnectionStage::Connected);
    assert_eq!(client.player_id(), server.player_id());
}

#[tokio::test]
async fn test_version_mismatch_returns_both_sides_to_not_connected() {
    let (mut transport, pool) = listen(config(3)).await;
    let addr = transport.local_addr().unwrap();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });

    let err = TcpConnection::connect(addr, config(2), pool, "old-client")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::VersionMismatch {
            local: 2,
            remote: 3
        }
    ));

    let server = accept.await.unwrap();
    assert!(matches!(next(&server).await, Message::Error(_)));
    assert_eq!(next(&server).await, Message::Disconnect);
    assert!(server.next_packet().await.is_none());
    assert_eq!(server.stage(), ConnectionStage::NotConnected);
    assert!(server.send_message(&Message::RequestPing).is_err());
}

#[tokio::test]
async fn test_server_answers_raw_bootstrap_with_player_id() {
    let (mut transport, _pool) = listen(config(1)).await;
    let addr = transport.local_addr().unwrap();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });

    let mut raw = TcpStream::connect(addr).await.unwrap();
    let codec = ObjectCodec::default();
    let mut hello = Buffer::new();
    Message::RequestId {
        version: 1,
        name: "raw".into(),
        data: None,
    }
    .encode(&codec, &mut hello)
    .unwrap();
    raw.write_all(hello.as_slice()).await.unwrap();

    let mut prefix = [0u8; 4];
    raw.read_exact(&mut prefix).await.unwrap();
    let mut body = vec![0u8; u32::from_le_bytes(prefix) as usize];
    raw.read_exact(&mut body).await.unwrap();
    let mut reply = Buffer::from_slice(&prefix);
    reply.begin_write(true).write_bytes(&body);
    reply.end_write();

    assert_eq!(
        Message::decode(&codec, &mut reply).unwrap(),
        Message::ResponseId {
            version: 1,
            player_id: PlayerId(1)
        }
    );
    let server = accept.await.unwrap();
    assert_eq!(server.peer_name().as_deref(), Some("raw"));
}

#[tokio::test]
async fn test_silent_client_is_dropped_after_verify_timeout() {
    let config = TransportConfig {
        verify_timeout: Duration::from_millis(100),
        ..TransportConfig::default()
    };
    let (mut transport, _pool) = listen(config).await;
    let addr = transport.local_addr().unwrap();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });

    let _raw = TcpStream::connect(addr).await.unwrap();
    let server = accept.await.unwrap();

    match next(&server).await {
        Message::Error(text) => assert!(text.contains("timed out"), "{text}"),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_eq!(next(&server).await, Message::Disconnect);
    assert_eq!(server.stage(), ConnectionStage::NotConnected);
}

// =========================================================================
// Traffic
// =========================================================================

#[tokio::test]
async fn test_packets_arrive_in_send_order() {
    let (client, server) = pair(1).await;

    for i in 0..100 {
        client
            .send_message(&Message::RequestSetName {
                name: format!("name-{i}"),
            })
            .unwrap();
    }

    for i in 0..100 {
        assert_eq!(
            next(&server).await,
            Message::RequestSetName {
                name: format!("name-{i}")
            }
        );
    }
}

#[tokio::test]
async fn test_peer_close_surfaces_exactly_one_disconnect() {
    let (client, server) = pair(1).await;

    client
        .send_message(&Message::RequestPing)
        .unwrap();
    assert_eq!(next(&server).await, Message::RequestPing);

    client.disconnect();

    assert_eq!(next(&server).await, Message::Disconnect);
    assert!(server.next_packet().await.is_none());
    assert!(server.receive_packet().is_none());
}

#[tokio::test]
async fn test_oversized_length_prefix_closes_with_error() {
    let (mut transport, pool) = listen(TransportConfig {
        max_packet_size: 64,
        ..TransportConfig::default()
    })
    .await;
    let addr = transport.local_addr().unwrap();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });
    let client = TcpConnection::connect(addr, config(1), pool.clone(), "big")
        .await
        .unwrap();
    let server = accept.await.unwrap();

    let mut large = pool.acquire();
    Message::RequestSaveFile {
        file_name: "save".into(),
        data: vec![0; 256],
    }
    .encode(client.codec(), &mut large)
    .unwrap();
    client.send_packet(large.share()).unwrap();

    match next(&server).await {
        Message::Error(text) => assert!(text.contains("exceeds"), "{text}"),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_eq!(next(&server).await, Message::Disconnect);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let (mut transport, _pool) = listen(config(1)).await;
    transport.shutdown().await.unwrap();
    assert!(matches!(
        transport.accept().await,
        Err(TransportError::Shutdown)
    ));
}
