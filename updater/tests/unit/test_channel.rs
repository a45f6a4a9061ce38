//! Command channel tests against a loopback UDP responder

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use lsrupd::channel::{CommandChannel, CommandTransport};
use lsrupd::progress::CollectingSink;

async fn spawn_responder() -> (u16, tokio::task::JoinHandle<Vec<String>>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        let mut buf = vec![0u8; 2048];
        loop {
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            let command = String::from_utf8_lossy(&buf[..len]).into_owned();
            if command.trim() == "quit" {
                return received;
            }
            let reply = match command.trim() {
                "bkr" => "[1] 0".to_string(),
                "phy stop" => "phy polling stopped".to_string(),
                "slow" => {
                    received.push(command);
                    continue; // never answer
                }
                other => format!("echo {}", other),
            };
            received.push(command);
            socket.send_to(reply.as_bytes(), from).await.unwrap();
        }
    });

    (port, handle)
}

fn channel_for(port: u16) -> (CommandChannel, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let channel = CommandChannel::new("127.0.0.1", port, Duration::from_millis(200), sink.clone());
    (channel, sink)
}

#[tokio::test]
async fn test_commands_are_newline_terminated_and_answered() {
    let (port, responder) = spawn_responder().await;
    let (mut channel, _sink) = channel_for(port);

    channel.connect().await.unwrap();
    assert!(channel.is_connected());

    let reply = channel.send_command("phy stop").await.unwrap();
    assert_eq!(reply.as_deref(), Some("phy polling stopped"));

    let reply = channel.send_command("bkr").await.unwrap();
    assert_eq!(reply.as_deref(), Some("[1] 0"));

    channel.send_fire_and_forget("quit").await.unwrap();
    let received = responder.await.unwrap();
    // Every command went out with a trailing newline
    assert_eq!(received, vec!["phy stop\n", "bkr\n"]);
}

#[tokio::test]
async fn test_timeout_yields_none_and_reports() {
    let (port, responder) = spawn_responder().await;
    let (mut channel, sink) = channel_for(port);

    channel.connect().await.unwrap();
    let reply = channel.send_command("slow").await.unwrap();
    assert_eq!(reply, None);
    assert!(sink.errors().iter().any(|e| e.contains("Timeout")));

    // An interrupt can be sent to abort the stuck command
    channel.send_interrupt().await.unwrap();

    channel.send_fire_and_forget("quit").await.unwrap();
    responder.await.unwrap();
}

#[tokio::test]
async fn test_reconnect_replaces_the_socket() {
    let (port, responder) = spawn_responder().await;
    let (mut channel, _sink) = channel_for(port);

    channel.connect().await.unwrap();
    channel.connect().await.unwrap(); // second connect drops the first socket
    assert!(channel.is_connected());

    let reply = channel.send_command("bkr").await.unwrap();
    assert_eq!(reply.as_deref(), Some("[1] 0"));

    channel.disconnect();
    assert!(!channel.is_connected());

    // Commands after disconnect fail fast
    assert!(channel.send_command("bkr").await.is_err());

    // Stop the responder task
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    probe.send_to(b"quit\n", ("127.0.0.1", port)).await.unwrap();
    responder.await.unwrap();
}
