//! Client handshake channel.
//!
//! Each connection is handled to completion: read one `HELLO` line (best
//! effort, short timeout), check bans, run the scheduler, write back a
//! `host:port` or `NO_SERVER_AVAILABLE`, append to the assignment log, close.
//! The balancer has no further role once the line is written.
use crate::balancing;
use crate::protocol::parse_hello;
use crate::registry::{ClientRecord, Registry};
use crate::{now_ms, AsyncResult, ChannelError};
use log::warn;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
const NO_SERVER_AVAILABLE: &[u8] = b"NO_SERVER_AVAILABLE\n";

pub async fn run(listener: TcpListener, registry: Arc<Registry>) -> AsyncResult<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, registry).await {
                warn!("client channel connection from {} failed: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
) -> Result<(), ChannelError> {
    let peer_ip = peer.ip().to_string();
    let mut line = String::new();
    {
        let mut reader = BufReader::new(&mut stream);
        let _ = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_line(&mut line)).await;
    }

    let hello = parse_hello(&line);
    let name = hello
        .as_ref()
        .and_then(|h| h.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| registry.next_auto_name());
    let mode = hello
        .and_then(|h| h.mode)
        .unwrap_or_else(|| registry.policy.default_mode());

    if registry.is_banned(&peer_ip, &name) {
        stream.write_all(NO_SERVER_AVAILABLE).await?;
        return Ok(());
    }

    let snapshot = registry.snapshot();
    let max_per_backend = registry.policy.max_per_backend();
    let selected = balancing::select(&snapshot, mode, max_per_backend, || registry.next_cursor());

    match selected {
        Some(backend) => {
            stream
                .write_all(format!("{}\n", backend).as_bytes())
                .await?;
            registry.record_assignment(ClientRecord {
                client_name: name,
                mode,
                assigned_at: now_ms(),
                backend,
                remote: peer.to_string(),
            });
        }
        None => {
            stream.write_all(NO_SERVER_AVAILABLE).await?;
        }
    }
    Ok(())
}
