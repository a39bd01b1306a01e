//! End-to-end wiring tests: real sockets for the backend and client
//! channels, driven against a shared registry, matching the scenarios in
//! the design notes (weighted static selection, bans, max-per-backend).
use rlb::registry::{Backend, Registry};
use rlb::{backend_channel, client_channel};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::TcpStream;

async fn spawn_client_channel(registry: Arc<Registry>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(client_channel::run(listener, registry));
    addr
}

async fn spawn_backend_channel(registry: Arc<Registry>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(backend_channel::run(listener, registry));
    addr
}

async fn hello(addr: std::net::SocketAddr, line: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();
    let mut buf = [0u8; 128];
    let n = stream.read(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf[..n]).to_string()
}

#[tokio::test]
async fn two_equal_weight_backends_alternate() {
    let registry = Arc::new(Registry::new());
    registry.add_backend(Backend::new("10.0.0.1", 9000));
    registry.add_backend(Backend::new("10.0.0.2", 9000));
    let addr = spawn_client_channel(registry).await;

    let mut picks = Vec::new();
    for i in 0..4 {
        let reply = hello(addr, &format!("HELLO c{} static\n", i)).await;
        picks.push(reply.trim().to_string());
    }
    assert_eq!(picks[0], picks[2]);
    assert_eq!(picks[1], picks[3]);
    assert_ne!(picks[0], picks[1]);
}

#[tokio::test]
async fn join_over_the_wire_registers_backend_once() {
    let registry = Arc::new(Registry::new());
    let addr = spawn_backend_channel(registry.clone()).await;

    let reply = hello(addr, "!join foo bar 7777\n").await;
    assert_eq!(reply, "!ack\n");
    let reply2 = hello(addr, "!join foo bar 7777\n").await;
    assert_eq!(reply2, "!ack\n");

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let snap = registry.snapshot();
    assert_eq!(snap.entries.len(), 1);
    assert_eq!(snap.entries[0].0.port, 7777);
}

#[tokio::test]
async fn ban_by_name_yields_sentinel_then_lifts() {
    let registry = Arc::new(Registry::new());
    registry.add_backend(Backend::new("10.0.0.1", 9000));
    registry.ban_name("Eve");
    let addr = spawn_client_channel(registry.clone()).await;

    let reply = hello(addr, "HELLO Eve dynamic\n").await;
    assert_eq!(reply, "NO_SERVER_AVAILABLE\n");

    registry.unban_name("Eve");
    let reply = hello(addr, "HELLO Eve dynamic\n").await;
    assert_eq!(reply, "10.0.0.1:9000\n");
}

#[tokio::test]
async fn maxconn_one_skips_saturated_backend() {
    let registry = Arc::new(Registry::new());
    registry.add_backend(Backend::new("10.0.0.1", 9000));
    registry.add_backend(Backend::new("10.0.0.2", 9000));
    registry.policy.set_max_per_backend(Some(1));
    registry.set_report(
        &Backend::new("10.0.0.1", 9000),
        vec![rlb::registry::LiveClient {
            name: "x".into(),
            ip: "1.1.1.1".into(),
            reported_at: 0,
        }],
    );
    let addr = spawn_client_channel(registry).await;

    for i in 0..5 {
        let reply = hello(addr, &format!("HELLO c{} static\n", i)).await;
        assert_eq!(reply, "10.0.0.2:9000\n");
    }
}

#[tokio::test]
async fn zero_backends_yields_sentinel() {
    let registry = Arc::new(Registry::new());
    let addr = spawn_client_channel(registry).await;
    let reply = hello(addr, "HELLO someone static\n").await;
    assert_eq!(reply, "NO_SERVER_AVAILABLE\n");
}
