//! Line-protocol parsing for the backend and client channels.
//!
//! Provides parsing for the three wire messages the balancer understands:
//! backend `!join`/`!report` lines and the client `HELLO` handshake. Kept
//! separate from the channels so the (fiddly, tolerant) parsing logic can be
//! unit-tested without a socket.
use crate::registry::Mode;

#[derive(Debug, PartialEq, Eq)]
pub enum BackendMessage {
    Join { port: u16 },
    Report { port: u16, clients: Vec<(String, String)> },
    Unknown,
}

/// Parse a `!join <...> <port>` or `!report <port> clients <n> <name>@<ip>...`
/// line. The port in `!join` is the last whitespace token, tolerant of any
/// intermediate tokens. Malformed numbers yield `Unknown` rather than an
/// error: one bad peer must never take down the channel.
pub fn parse_backend_message(line: &str) -> BackendMessage {
    let tokens: Vec<&str> = line.trim().split_whitespace().collect();
    if tokens.is_empty() {
        return BackendMessage::Unknown;
    }
    match tokens[0] {
        "!join" => match tokens.last().and_then(|t| t.parse::<u16>().ok()) {
            Some(port) => BackendMessage::Join { port },
            None => BackendMessage::Unknown,
        },
        "!report" => parse_report(&tokens),
        _ => BackendMessage::Unknown,
    }
}

fn parse_report(tokens: &[&str]) -> BackendMessage {
    // !report <port> clients <n> <name>@<ip> <name>@<ip> ...
    if tokens.len() < 2 {
        return BackendMessage::Unknown;
    }
    let port = match tokens[1].parse::<u16>() {
        Ok(p) => p,
        Err(_) => return BackendMessage::Unknown,
    };
    // tokens[2] is expected to be "clients", tokens[3] the count hint; both
    // are read loosely since extra/missing tokens are tolerated.
    let n: usize = tokens
        .get(3)
        .and_then(|t| t.parse::<usize>().ok())
        .unwrap_or(usize::MAX);
    let clients = tokens
        .iter()
        .skip(4)
        .take(n)
        .map(|t| parse_name_at_ip(t))
        .collect();
    BackendMessage::Report { port, clients }
}

/// Split on the *last* `@`; if absent, the whole token is the name and the
/// ip is `unknown`.
fn parse_name_at_ip(token: &str) -> (String, String) {
    match token.rfind('@') {
        Some(pos) => (token[..pos].to_string(), token[pos + 1..].to_string()),
        None => (token.to_string(), "unknown".to_string()),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Hello {
    pub name: Option<String>,
    pub mode: Option<Mode>,
}

/// Parse a `HELLO <name> <mode>` line, case-insensitive on the keyword.
/// Returns `None` if the line doesn't start with `HELLO`; a missing name or
/// mode is tolerated and left as `None` for the caller to default.
pub fn parse_hello(line: &str) -> Option<Hello> {
    let tokens: Vec<&str> = line.trim().split_whitespace().collect();
    let first = tokens.first()?;
    if !first.eq_ignore_ascii_case("HELLO") {
        return None;
    }
    let name = tokens.get(1).map(|s| s.to_string());
    let mode = tokens.get(2).and_then(|s| s.to_lowercase().parse::<Mode>().ok());
    Some(Hello { name, mode })
}
