//! TFTP client tests against an in-process loopback server

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use lsrupd::errors::UpdaterError;
use lsrupd::progress::CollectingSink;
use lsrupd::tftp::packet::BLOCK_SIZE;
use lsrupd::tftp::{TftpClient, TftpPacket};

/// What the mock server saw during one write transfer
struct ServerCapture {
    /// File content assembled from the data blocks, in order
    content: Vec<u8>,
    /// Every data block number received, duplicates included
    blocks_seen: Vec<u16>,
}

/// Spawn a TFTP write-side server on a loopback port.
///
/// The initial ack comes from a second, ephemeral socket so the client has
/// to lock onto the new endpoint, like a real server. `drop_first_acks`
/// suppresses that many acks for block 1 to force retransmission.
async fn spawn_wrq_server(drop_first_acks: u32) -> (u16, JoinHandle<ServerCapture>) {
    let listen = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = listen.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 4 + BLOCK_SIZE];

        // Write request arrives on the well-known socket
        let (len, client) = listen.recv_from(&mut buf).await.unwrap();
        match TftpPacket::decode(&buf[..len]).unwrap() {
            TftpPacket::WriteRequest { .. } => {}
            other => panic!("expected write request, got {:?}", other),
        }

        // All further traffic uses a transfer socket on an ephemeral port
        let transfer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        transfer.connect(client).await.unwrap();
        transfer
            .send(&TftpPacket::Ack { block: 0 }.encode())
            .await
            .unwrap();

        let mut capture = ServerCapture {
            content: Vec::new(),
            blocks_seen: Vec::new(),
        };
        let mut expected: u16 = 1;
        let mut acks_dropped = 0;

        loop {
            let len = transfer.recv(&mut buf).await.unwrap();
            let (block, payload) = match TftpPacket::decode(&buf[..len]).unwrap() {
                TftpPacket::Data { block, payload } => (block, payload),
                other => panic!("expected data, got {:?}", other),
            };
            capture.blocks_seen.push(block);

            if block == 1 && acks_dropped < drop_first_acks {
                acks_dropped += 1;
                continue;
            }

            if block == expected {
                capture.content.extend_from_slice(&payload);
                expected += 1;
            }
            transfer
                .send(&TftpPacket::Ack { block }.encode())
                .await
                .unwrap();

            if payload.len() < BLOCK_SIZE {
                return capture;
            }
        }
    });

    (port, handle)
}

/// Spawn a TFTP read-side server that serves `content` in two data blocks.
///
/// Like [`spawn_wrq_server`], the data comes from a second ephemeral socket
/// so the client has to lock onto the new endpoint. Block 1 is sent twice
/// to simulate a lost ack; the server returns every ack block number it saw.
async fn spawn_rrq_server(content: Vec<u8>) -> (u16, JoinHandle<Vec<u16>>) {
    let listen = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = listen.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 4 + BLOCK_SIZE];

        let (len, client) = listen.recv_from(&mut buf).await.unwrap();
        match TftpPacket::decode(&buf[..len]).unwrap() {
            TftpPacket::ReadRequest { .. } => {}
            other => panic!("expected read request, got {:?}", other),
        }

        let transfer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        transfer.connect(client).await.unwrap();

        let mut acks_seen = Vec::new();

        let first = TftpPacket::Data {
            block: 1,
            payload: content[..BLOCK_SIZE].to_vec(),
        }
        .encode();
        transfer.send(&first).await.unwrap();

        let len = transfer.recv(&mut buf).await.unwrap();
        match TftpPacket::decode(&buf[..len]).unwrap() {
            TftpPacket::Ack { block } => acks_seen.push(block),
            other => panic!("expected ack, got {:?}", other),
        }

        // Pretend the ack got lost and send block 1 again
        transfer.send(&first).await.unwrap();
        let len = transfer.recv(&mut buf).await.unwrap();
        match TftpPacket::decode(&buf[..len]).unwrap() {
            TftpPacket::Ack { block } => acks_seen.push(block),
            other => panic!("expected ack, got {:?}", other),
        }

        let second = TftpPacket::Data {
            block: 2,
            payload: content[BLOCK_SIZE..].to_vec(),
        }
        .encode();
        transfer.send(&second).await.unwrap();
        let len = transfer.recv(&mut buf).await.unwrap();
        match TftpPacket::decode(&buf[..len]).unwrap() {
            TftpPacket::Ack { block } => acks_seen.push(block),
            other => panic!("expected ack, got {:?}", other),
        }

        acks_seen
    });

    (port, handle)
}

fn client_for(port: u16) -> (TftpClient, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let client = TftpClient::new("127.0.0.1", sink.clone())
        .with_server_port(port)
        .with_timing(Duration::from_millis(200), 3);
    (client, sink)
}

#[tokio::test]
async fn test_send_file_delivers_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lsr4-20221202.bin");
    let content: Vec<u8> = (0..1300u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &content).unwrap();

    let (port, server) = spawn_wrq_server(0).await;
    let (client, _sink) = client_for(port);

    let sent = client.send_file(&path, "lsr4-20221202.bin").await.unwrap();
    assert_eq!(sent, 1300);

    let capture = server.await.unwrap();
    assert_eq!(capture.content, content);
    // 512 + 512 + 276
    assert_eq!(capture.blocks_seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_exact_multiple_ends_with_empty_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lsr4-20230101.bin");
    let content = vec![0x5Au8; 1024];
    std::fs::write(&path, &content).unwrap();

    let (port, server) = spawn_wrq_server(0).await;
    let (client, _sink) = client_for(port);

    let sent = client.send_file(&path, "lsr4-20230101.bin").await.unwrap();
    assert_eq!(sent, 1024);

    // Two full blocks plus the zero-length terminator
    let capture = server.await.unwrap();
    assert_eq!(capture.content, content);
    assert_eq!(capture.blocks_seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_lost_acks_force_retransmission() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lsr4-20221202.bin");
    std::fs::write(&path, vec![1u8; 700]).unwrap();

    let (port, server) = spawn_wrq_server(2).await;
    let (client, _sink) = client_for(port);

    let sent = client.send_file(&path, "lsr4-20221202.bin").await.unwrap();
    assert_eq!(sent, 700);

    // Block 1 went out three times before its ack got through
    let capture = server.await.unwrap();
    assert_eq!(capture.blocks_seen, vec![1, 1, 1, 2]);
    assert_eq!(capture.content.len(), 700);
}

#[tokio::test]
async fn test_receive_file_reacks_duplicate_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backup.bin");
    let content: Vec<u8> = (0..700u32).map(|i| (i % 239) as u8).collect();

    let (port, server) = spawn_rrq_server(content.clone()).await;
    let (client, _sink) = client_for(port);

    let received = client.receive_file("backup.bin", &path).await.unwrap();
    assert_eq!(received, 700);
    assert_eq!(std::fs::read(&path).unwrap(), content);

    // The repeated block 1 was acked again, not written twice
    let acks_seen = server.await.unwrap();
    assert_eq!(acks_seen, vec![1, 1, 2]);
}

#[tokio::test]
async fn test_missing_file_is_reported_before_any_traffic() {
    let (client, _sink) = client_for(9); // discard port, never reached
    let err = client
        .send_file(std::path::Path::new("/nonexistent/image.bin"), "image.bin")
        .await
        .unwrap_err();
    assert!(matches!(err, UpdaterError::FileNotFound(_)));
}

#[tokio::test]
async fn test_server_error_reply_aborts_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lsr4-20221202.bin");
    std::fs::write(&path, vec![0u8; 100]).unwrap();

    let listen = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = listen.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4 + BLOCK_SIZE];
        let (_, client) = listen.recv_from(&mut buf).await.unwrap();
        let refusal = TftpPacket::Error {
            code: 2,
            message: "Access violation".to_string(),
        };
        listen.send_to(&refusal.encode(), client).await.unwrap();
    });

    let (client, _sink) = client_for(port);
    let err = client
        .send_file(&path, "lsr4-20221202.bin")
        .await
        .unwrap_err();
    match err {
        UpdaterError::ProtocolError(message) => assert!(message.contains("Access violation")),
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lsr4-20221202.bin");
    std::fs::write(&path, vec![0u8; 100]).unwrap();

    // Bound but never reads: the write request goes unanswered
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = silent.local_addr().unwrap().port();

    let (client, _sink) = client_for(port);
    let err = client
        .send_file(&path, "lsr4-20221202.bin")
        .await
        .unwrap_err();
    assert!(matches!(err, UpdaterError::ProtocolError(_)));
    drop(silent);
}
