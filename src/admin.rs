//! Administrative console.
//!
//! A single cooperative reader over standard input, driving synchronous
//! mutations on the registry. Never holds a lock across its own I/O: each
//! command is parsed, applied against the registry in one shot, and its
//! result printed.
use crate::registry::{Backend, Mode, Registry};
use crate::AdminError;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::Arc;

const HELP: &str = "\
commands:
  servers                          list backends with rtt/weight/drain/live count
  live                             per-backend live client lists
  clients | recent                 last <=500 assignments
  status                           servers + live
  drain <h:p> | drain all          exclude a backend (or all) from selection
  undrain <h:p> | undrain all      reinstate a backend (or all)
  drained                          list drained backends
  setweight <h:p> <n>              set RR weight (clamped >=1)
  weights                          list backend weights
  mode default <static|dynamic>    change the default selection mode
  set ping <ms>                    set probe interval (clamped >=200)
  set maxconn <n>                  set per-backend live-client cap
  ban ip <x> | ban name <x>        deny a client ip or name
  unban ip <x> | unban name <x>    lift a ban
  bans                             list banned ips and names
  remove <h:p>                     drop a backend from the registry
  clear                            empty the assignment log
  help                             print this summary
";

/// Runs the console to completion (i.e. until stdin closes). Blocks the
/// calling thread on reads, so it's meant to run inside
/// `tokio::task::spawn_blocking`.
pub fn run(
    registry: Arc<Registry>,
    ping_interval_tx: tokio::sync::watch::Sender<u64>,
) -> Result<(), AdminError> {
    let stdin = io::stdin();
    let mut out = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let tokens: Vec<&str> = line.trim().split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        let reply = dispatch(&registry, &tokens, &ping_interval_tx);
        writeln!(out, "{}", reply)?;
    }
    Ok(())
}

fn dispatch(
    registry: &Arc<Registry>,
    tokens: &[&str],
    ping_interval_tx: &tokio::sync::watch::Sender<u64>,
) -> String {
    match tokens[0] {
        "servers" => fmt_servers(registry),
        "live" => fmt_live(registry),
        "clients" | "recent" => fmt_recent(registry),
        "status" => format!("{}\n{}", fmt_servers(registry), fmt_live(registry)),
        "drain" => with_backend_or_all(
            tokens,
            |b| registry.drain(b),
            || registry.drain_all(),
            "drain",
        ),
        "undrain" => with_backend_or_all(
            tokens,
            |b| registry.undrain(b),
            || registry.undrain_all(),
            "undrain",
        ),
        "drained" => fmt_drained(registry),
        "setweight" => cmd_setweight(registry, tokens),
        "weights" => fmt_weights(registry),
        "mode" => cmd_mode(registry, tokens),
        "set" => cmd_set(registry, tokens, ping_interval_tx),
        "ban" => cmd_ban(registry, tokens),
        "unban" => cmd_unban(registry, tokens),
        "bans" => fmt_bans(registry),
        "remove" => cmd_remove(registry, tokens),
        "clear" => {
            registry.clear_assignments();
            "assignment log cleared".to_string()
        }
        "help" => HELP.to_string(),
        other => format!("unknown command '{}', try 'help'", other),
    }
}

fn parse_backend(token: &str) -> Option<Backend> {
    let (addr, port) = token.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some(Backend::new(addr, port))
}

fn with_backend_or_all(
    tokens: &[&str],
    one: impl Fn(&Backend) -> bool,
    all: impl Fn(),
    verb: &str,
) -> String {
    match tokens.get(1) {
        Some(&"all") => {
            all();
            format!("{} applied to all backends", verb)
        }
        Some(t) => match parse_backend(t) {
            Some(b) => {
                if one(&b) {
                    format!("{} {}", verb, b)
                } else {
                    format!("unknown backend {}", b)
                }
            }
            None => format!("usage: {} <host:port>|all", verb),
        },
        None => format!("usage: {} <host:port>|all", verb),
    }
}

fn cmd_setweight(registry: &Arc<Registry>, tokens: &[&str]) -> String {
    match (tokens.get(1), tokens.get(2)) {
        (Some(t), Some(n)) => match (parse_backend(t), n.parse::<u32>()) {
            (Some(b), Ok(w)) => {
                if registry.set_weight(&b, w) {
                    format!("weight {} set on {}", w.max(1), b)
                } else {
                    format!("unknown backend {}", b)
                }
            }
            _ => "usage: setweight <host:port> <n>".to_string(),
        },
        _ => "usage: setweight <host:port> <n>".to_string(),
    }
}

fn cmd_mode(registry: &Arc<Registry>, tokens: &[&str]) -> String {
    match (tokens.get(1), tokens.get(2)) {
        (Some(&"default"), Some(m)) => match Mode::from_str(m) {
            Ok(mode) => {
                registry.policy.set_default_mode(mode);
                format!("default mode set to {}", mode)
            }
            Err(_) => "usage: mode default <static|dynamic>".to_string(),
        },
        _ => "usage: mode default <static|dynamic>".to_string(),
    }
}

fn cmd_set(
    registry: &Arc<Registry>,
    tokens: &[&str],
    ping_interval_tx: &tokio::sync::watch::Sender<u64>,
) -> String {
    match (tokens.get(1), tokens.get(2)) {
        (Some(&"ping"), Some(ms)) => match ms.parse::<u64>() {
            Ok(ms) => {
                let clamped = registry.policy.set_ping_interval_ms(ms);
                let _ = ping_interval_tx.send(clamped);
                format!("ping interval set to {}ms", clamped)
            }
            Err(_) => "usage: set ping <ms>".to_string(),
        },
        (Some(&"maxconn"), Some(n)) => match n.parse::<u32>() {
            Ok(n) => {
                registry.policy.set_max_per_backend(Some(n));
                format!("max per backend set to {}", n)
            }
            Err(_) => "usage: set maxconn <n>".to_string(),
        },
        _ => "usage: set ping <ms> | set maxconn <n>".to_string(),
    }
}

fn cmd_ban(registry: &Arc<Registry>, tokens: &[&str]) -> String {
    match (tokens.get(1), tokens.get(2)) {
        (Some(&"ip"), Some(x)) => {
            registry.ban_ip(*x);
            format!("banned ip {}", x)
        }
        (Some(&"name"), Some(x)) => {
            registry.ban_name(*x);
            format!("banned name {}", x)
        }
        _ => "usage: ban ip <x> | ban name <x>".to_string(),
    }
}

fn cmd_unban(registry: &Arc<Registry>, tokens: &[&str]) -> String {
    match (tokens.get(1), tokens.get(2)) {
        (Some(&"ip"), Some(x)) => {
            registry.unban_ip(x);
            format!("unbanned ip {}", x)
        }
        (Some(&"name"), Some(x)) => {
            registry.unban_name(x);
            format!("unbanned name {}", x)
        }
        _ => "usage: unban ip <x> | unban name <x>".to_string(),
    }
}

fn cmd_remove(registry: &Arc<Registry>, tokens: &[&str]) -> String {
    match tokens.get(1).and_then(|t| parse_backend(t)) {
        Some(b) => {
            if registry.remove(&b) {
                format!("removed {}", b)
            } else {
                format!("unknown backend {}", b)
            }
        }
        None => "usage: remove <host:port>".to_string(),
    }
}

fn fmt_servers(registry: &Arc<Registry>) -> String {
    let snap = registry.snapshot();
    if snap.entries.is_empty() {
        return "no backends registered".to_string();
    }
    snap.entries
        .iter()
        .map(|(b, e)| {
            format!(
                "{}  weight={} drained={} rtt={} live={}",
                b,
                e.weight,
                e.drained,
                e.rtt_ms.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string()),
                e.live_count()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fmt_live(registry: &Arc<Registry>) -> String {
    let snap = registry.snapshot();
    snap.entries
        .iter()
        .map(|(b, e)| match &e.live_clients {
            Some(clients) if !clients.is_empty() => format!(
                "{}: {}",
                b,
                clients
                    .iter()
                    .map(|c| format!("{}@{}", c.name, c.ip))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => format!("{}: (no reports)", b),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fmt_recent(registry: &Arc<Registry>) -> String {
    let recent = registry.recent_assignments();
    if recent.is_empty() {
        return "no assignments yet".to_string();
    }
    recent
        .iter()
        .map(|r| {
            format!(
                "{} -> {} ({}, from {})",
                r.client_name, r.backend, r.mode, r.remote
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fmt_drained(registry: &Arc<Registry>) -> String {
    let snap = registry.snapshot();
    let drained: Vec<String> = snap
        .entries
        .iter()
        .filter(|(_, e)| e.drained)
        .map(|(b, _)| b.to_string())
        .collect();
    if drained.is_empty() {
        "no backends drained".to_string()
    } else {
        drained.join("\n")
    }
}

fn fmt_weights(registry: &Arc<Registry>) -> String {
    let snap = registry.snapshot();
    snap.entries
        .iter()
        .map(|(b, e)| format!("{}: {}", b, e.weight))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fmt_bans(registry: &Arc<Registry>) -> String {
    format!(
        "ips: {}\nnames: {}",
        registry.banned_ips().join(", "),
        registry.banned_names().join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch() -> tokio::sync::watch::Sender<u64> {
        tokio::sync::watch::channel(1000u64).0
    }

    #[test]
    fn drain_then_undrain_roundtrips() {
        let registry = Arc::new(Registry::new());
        registry.add_backend(Backend::new("a", 1));
        let tx = watch();
        dispatch(&registry, &["drain", "a:1"], &tx);
        assert!(registry.snapshot().entries[0].1.drained);
        dispatch(&registry, &["undrain", "a:1"], &tx);
        assert!(!registry.snapshot().entries[0].1.drained);
    }

    #[test]
    fn setweight_clamps_to_one() {
        let registry = Arc::new(Registry::new());
        registry.add_backend(Backend::new("a", 1));
        let tx = watch();
        dispatch(&registry, &["setweight", "a:1", "0"], &tx);
        assert_eq!(registry.snapshot().entries[0].1.weight, 1);
    }

    #[test]
    fn set_ping_clamps_and_publishes() {
        let registry = Arc::new(Registry::new());
        let tx = watch();
        let mut rx = tx.subscribe();
        dispatch(&registry, &["set", "ping", "50"], &tx);
        assert_eq!(registry.policy.ping_interval_ms(), 200);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 200);
    }

    #[test]
    fn ban_and_unban_name() {
        let registry = Arc::new(Registry::new());
        let tx = watch();
        dispatch(&registry, &["ban", "name", "eve"], &tx);
        assert!(registry.is_banned("1.2.3.4", "eve"));
        dispatch(&registry, &["unban", "name", "eve"], &tx);
        assert!(!registry.is_banned("1.2.3.4", "eve"));
    }

    #[test]
    fn unknown_command_returns_hint() {
        let registry = Arc::new(Registry::new());
        let tx = watch();
        let reply = dispatch(&registry, &["bogus"], &tx);
        assert!(reply.contains("unknown command"));
    }

    #[test]
    fn remove_unknown_backend_reports_error() {
        let registry = Arc::new(Registry::new());
        let tx = watch();
        let reply = dispatch(&registry, &["remove", "a:1"], &tx);
        assert!(reply.contains("unknown backend"));
    }

    #[test]
    fn clear_empties_log() {
        let registry = Arc::new(Registry::new());
        registry.record_assignment(crate::registry::ClientRecord {
            client_name: "c".into(),
            mode: Mode::Static,
            assigned_at: 0,
            backend: Backend::new("a", 1),
            remote: "1.1.1.1:1".into(),
        });
        let tx = watch();
        dispatch(&registry, &["clear"], &tx);
        assert!(registry.recent_assignments().is_empty());
    }
}
