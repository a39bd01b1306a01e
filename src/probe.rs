//! Periodic RTT probe loop.
//!
//! Each tick snapshots the registry's backend set, fans out one TCP `ping`
//! per backend concurrently, and writes successful RTTs back. Failures
//! leave the previous RTT untouched. Changing the interval cancels the
//! in-flight probe task and starts a fresh one via `JoinHandle::abort`
//! rather than re-reading the period inline.
use crate::registry::{Backend, Registry};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Drives the probe loop, restarting it whenever `ping_interval_ms` changes.
pub async fn run(registry: Arc<Registry>, mut interval_changed: watch::Receiver<u64>) {
    let mut period = registry.policy.ping_interval_ms();
    let mut handle = spawn_probe_task(registry.clone(), period);

    loop {
        if interval_changed.changed().await.is_err() {
            handle.abort();
            return;
        }
        let new_period = *interval_changed.borrow();
        if new_period == period {
            continue;
        }
        period = new_period;
        handle.abort();
        handle = spawn_probe_task(registry.clone(), period);
    }
}

fn spawn_probe_task(registry: Arc<Registry>, period_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
        loop {
            ticker.tick().await;
            probe_tick(&registry, period_ms).await;
        }
    })
}

async fn probe_tick(registry: &Arc<Registry>, period_ms: u64) {
    let snapshot = registry.snapshot();
    let read_timeout = Duration::from_millis(period_ms.max(400) / 2).max(Duration::from_millis(200));

    let mut handles = Vec::with_capacity(snapshot.entries.len());
    for (backend, _) in snapshot.entries {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            match probe_one(&backend, read_timeout).await {
                Some(rtt) => {
                    registry.set_rtt(&backend, rtt);
                    debug!("probe {} -> {}ms", backend, rtt);
                }
                None => warn!("probe {} failed", backend),
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

/// Open a fresh TCP connection to `backend`, write `ping\n`, and read one
/// line within `timeout`. Returns the elapsed wall-clock time in ms if the
/// trimmed response equals `pong` case-insensitively.
async fn probe_one(backend: &Backend, timeout: Duration) -> Option<u64> {
    let addr = (backend.address.as_str(), backend.port);
    let started = Instant::now();
    let fut = async {
        let mut stream = TcpStream::connect(addr).await.ok()?;
        stream.write_all(b"ping\n").await.ok()?;
        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        Some(line)
    };
    let line = tokio::time::timeout(timeout, fut).await.ok()??;
    if line.trim().eq_ignore_ascii_case("pong") {
        Some(started.elapsed().as_millis() as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn probe_records_pong_rtt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"pong\n").await.unwrap();
        });
        let backend = Backend::new(addr.ip().to_string(), addr.port());
        let rtt = probe_one(&backend, Duration::from_millis(500)).await;
        assert!(rtt.is_some());
    }

    #[tokio::test]
    async fn probe_ignores_wrong_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"nope\n").await.unwrap();
        });
        let backend = Backend::new(addr.ip().to_string(), addr.port());
        let rtt = probe_one(&backend, Duration::from_millis(500)).await;
        assert!(rtt.is_none());
    }

    #[tokio::test]
    async fn probe_times_out_on_silent_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let backend = Backend::new(addr.ip().to_string(), addr.port());
        let rtt = probe_one(&backend, Duration::from_millis(50)).await;
        assert!(rtt.is_none());
    }

    #[tokio::test]
    async fn probe_failure_leaves_rtt_unchanged() {
        let registry = Arc::new(Registry::new());
        let backend = Backend::new("127.0.0.1", 1);
        registry.add_backend(backend.clone());
        registry.set_rtt(&backend, 42);
        // port 1 is reserved and nothing listens there in test environments
        probe_tick(&registry, 1000).await;
        assert_eq!(registry.snapshot().entries[0].1.rtt_ms, Some(42));
    }
}
