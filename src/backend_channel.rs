//! Backend registration channel.
//!
//! Accepts one request per connection: `!join` registers or no-ops, `!report`
//! replaces the live-client list, anything else gets `!err`. A bad peer
//! never brings the channel down; it's logged and the accept loop continues.
use crate::protocol::{parse_backend_message, BackendMessage};
use crate::registry::{Backend, LiveClient, Registry};
use crate::{now_ms, AsyncResult, ChannelError};
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub async fn run(listener: TcpListener, registry: Arc<Registry>) -> AsyncResult<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer.ip().to_string(), registry).await {
                warn!("backend channel connection from {} failed: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_ip: String,
    registry: Arc<Registry>,
) -> Result<(), ChannelError> {
    let (reader_half, mut writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.trim().is_empty() {
        return Ok(());
    }

    match parse_backend_message(&line) {
        BackendMessage::Join { port } => {
            let backend = Backend::new(peer_ip, port);
            match registry.add_backend(backend.clone()) {
                crate::registry::AddOutcome::New => info!("backend joined: {}", backend),
                crate::registry::AddOutcome::Exists => {}
            }
            writer_half.write_all(b"!ack\n").await?;
        }
        BackendMessage::Report { port, clients } => {
            let backend = Backend::new(peer_ip, port);
            let live = clients
                .into_iter()
                .map(|(name, ip)| LiveClient {
                    name,
                    ip,
                    reported_at: now_ms(),
                })
                .collect();
            if !registry.set_report(&backend, live) {
                warn!("report for unknown backend {}", backend);
            }
        }
        BackendMessage::Unknown => {
            writer_half.write_all(b"!err\n").await?;
        }
    }
    Ok(())
}
