//! Ties the balancer's concurrent activities together: the backend
//! acceptor, the client acceptor, the probe loop and the admin console all
//! run for the lifetime of the process, sharing one `Registry`.
use crate::registry::Registry;
use crate::{admin, backend_channel, client_channel, probe, AsyncResult};
use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Bind the client and backend listeners and run every component until one
/// of the acceptors fails fatally. Binding failures are the only fatal
/// errors in this system; everything else is local to its task.
pub async fn run(client_addr: &str, backend_addr: &str, registry: Arc<Registry>) -> AsyncResult<()> {
    let client_listener = TcpListener::bind(client_addr).await?;
    info!("client channel listening on {}", client_addr);
    let backend_listener = TcpListener::bind(backend_addr).await?;
    info!("backend channel listening on {}", backend_addr);

    let (ping_tx, ping_rx) = watch::channel(registry.policy.ping_interval_ms());

    let probe_registry = registry.clone();
    tokio::spawn(async move {
        probe::run(probe_registry, ping_rx).await;
    });

    let admin_registry = registry.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = admin::run(admin_registry, ping_tx) {
            error!("admin console stopped: {}", e);
        }
    });

    let backend_registry = registry.clone();
    let backend_task = tokio::spawn(async move {
        if let Err(e) = backend_channel::run(backend_listener, backend_registry).await {
            error!("backend channel stopped: {}", e);
        }
    });

    let client_registry = registry.clone();
    let client_task = tokio::spawn(async move {
        if let Err(e) = client_channel::run(client_listener, client_registry).await {
            error!("client channel stopped: {}", e);
        }
    });

    let _ = tokio::try_join!(backend_task, client_task)?;
    Ok(())
}
