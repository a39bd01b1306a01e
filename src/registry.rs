//! Backend registry: the balancer's authoritative in-memory state.
//!
//! Holds the backend set, their weights/drain flags/RTTs/live-client reports,
//! the derived weighted schedule, the ban sets, the policy knobs and the
//! assignment log. All mutations that touch the backend set or the weighted
//! schedule happen under one lock so the two never disagree.
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

const ASSIGNMENT_LOG_CAP: usize = 500;
const MAX_PER_BACKEND_UNLIMITED: u32 = u32::MAX;

/// A backend's identity: address and port. Equality and hashing are over
/// both fields. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    pub address: String,
    pub port: u16,
}

impl Backend {
    pub fn new(address: impl Into<String>, port: u16) -> Backend {
        Backend {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A client a backend reports as currently connected.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveClient {
    pub name: String,
    pub ip: String,
    pub reported_at: i64,
}

/// Client selection mode, requested at handshake or set as the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Static,
    Dynamic,
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Mode, ()> {
        match s.to_lowercase().as_str() {
            "static" => Ok(Mode::Static),
            "dynamic" => Ok(Mode::Dynamic),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Static => write!(f, "static"),
            Mode::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// One entry in the assignment log: a client→backend dispatch.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub client_name: String,
    pub mode: Mode,
    pub assigned_at: i64,
    pub backend: Backend,
    pub remote: String,
}

/// Per-backend mutable state.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub weight: u32,
    pub drained: bool,
    pub rtt_ms: Option<u64>,
    pub live_clients: Option<Vec<LiveClient>>,
}

impl RegistryEntry {
    fn new() -> RegistryEntry {
        RegistryEntry {
            weight: 1,
            drained: false,
            rtt_ms: None,
            live_clients: None,
        }
    }

    pub fn live_count(&self) -> usize {
        self.live_clients.as_ref().map(|v| v.len()).unwrap_or(0)
    }
}

/// Whether `add_backend` created a new entry or found an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    New,
    Exists,
}

/// A point-in-time, internally consistent copy of the backend set used by
/// one scheduling decision, one admin print, or one probe fan-out.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub entries: Vec<(Backend, RegistryEntry)>,
    /// Flattened weighted schedule, each backend repeated `weight` times in
    /// registration order. Indexes into `entries`.
    pub schedule: Vec<usize>,
}

impl RegistrySnapshot {
    /// Backends that are not drained and below the per-backend cap.
    pub fn candidates(&self, max_per_backend: Option<u32>) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, (_, e))| !e.drained)
            .filter(|(_, (_, e))| match max_per_backend {
                Some(max) => (e.live_count() as u32) < max,
                None => true,
            })
            .map(|(i, _)| i)
            .collect()
    }
}

/// Inner guarded state: the backend set and its derived schedule, mutated
/// together so a snapshot never sees one without the other.
struct Inner {
    entries: Vec<(Backend, RegistryEntry)>,
    schedule: Vec<usize>,
}

impl Inner {
    fn rebuild_schedule(&mut self) {
        self.schedule = self
            .entries
            .iter()
            .enumerate()
            .flat_map(|(i, (_, e))| std::iter::repeat(i).take(e.weight as usize))
            .collect();
    }

    fn index_of(&self, backend: &Backend) -> Option<usize> {
        self.entries.iter().position(|(b, _)| b == backend)
    }
}

/// Current values of the global policy knobs. Each field independently
/// atomic — a reader may observe an old value of one knob alongside a new
/// value of another, but never a torn single knob.
pub struct Policy {
    default_mode: AtomicU8,
    max_per_backend: AtomicU32,
    ping_interval_ms: AtomicU64,
}

impl Policy {
    fn new() -> Policy {
        Policy {
            default_mode: AtomicU8::new(Mode::Static as u8),
            max_per_backend: AtomicU32::new(MAX_PER_BACKEND_UNLIMITED),
            ping_interval_ms: AtomicU64::new(1000),
        }
    }

    pub fn default_mode(&self) -> Mode {
        match self.default_mode.load(Ordering::Relaxed) {
            1 => Mode::Dynamic,
            _ => Mode::Static,
        }
    }

    pub fn set_default_mode(&self, mode: Mode) {
        self.default_mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn max_per_backend(&self) -> Option<u32> {
        match self.max_per_backend.load(Ordering::Relaxed) {
            MAX_PER_BACKEND_UNLIMITED => None,
            n => Some(n),
        }
    }

    pub fn set_max_per_backend(&self, max: Option<u32>) {
        self.max_per_backend
            .store(max.unwrap_or(MAX_PER_BACKEND_UNLIMITED), Ordering::Relaxed);
    }

    pub fn ping_interval_ms(&self) -> u64 {
        self.ping_interval_ms.load(Ordering::Relaxed)
    }

    /// Clamps to the 200ms floor and returns the stored value.
    pub fn set_ping_interval_ms(&self, ms: u64) -> u64 {
        let clamped = ms.max(200);
        self.ping_interval_ms.store(clamped, Ordering::Relaxed);
        clamped
    }
}

/// Owns all mutable shared state of the balancer. Cheap to clone (it's
/// always handed out as `Arc<Registry>`); every method takes `&self`.
pub struct Registry {
    inner: RwLock<Inner>,
    rr_cursor: AtomicU64,
    client_counter: AtomicU64,
    ban_ips: DashSet<String>,
    ban_names: DashSet<String>,
    assignments: Mutex<VecDeque<ClientRecord>>,
    pub policy: Policy,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                schedule: Vec::new(),
            }),
            rr_cursor: AtomicU64::new(0),
            client_counter: AtomicU64::new(0),
            ban_ips: DashSet::new(),
            ban_names: DashSet::new(),
            assignments: Mutex::new(VecDeque::new()),
            policy: Policy::new(),
        }
    }

    /// Add a backend if it doesn't already exist. The balancer never
    /// invents a backend: this is only called from a `!join`.
    pub fn add_backend(&self, backend: Backend) -> AddOutcome {
        let mut inner = self.inner.write();
        if inner.index_of(&backend).is_some() {
            return AddOutcome::Exists;
        }
        inner.entries.push((backend, RegistryEntry::new()));
        inner.rebuild_schedule();
        AddOutcome::New
    }

    pub fn remove(&self, backend: &Backend) -> bool {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|(b, _)| b != backend);
        let removed = inner.entries.len() != before;
        if removed {
            inner.rebuild_schedule();
        }
        removed
    }

    /// Clamped to a minimum of 1 per invariant 2.
    pub fn set_weight(&self, backend: &Backend, weight: u32) -> bool {
        let mut inner = self.inner.write();
        let clamped = weight.max(1);
        match inner.index_of(backend) {
            Some(i) => {
                inner.entries[i].1.weight = clamped;
                inner.rebuild_schedule();
                true
            }
            None => false,
        }
    }

    pub fn drain(&self, backend: &Backend) -> bool {
        self.set_drained(backend, true)
    }

    pub fn undrain(&self, backend: &Backend) -> bool {
        self.set_drained(backend, false)
    }

    fn set_drained(&self, backend: &Backend, drained: bool) -> bool {
        let mut inner = self.inner.write();
        match inner.index_of(backend) {
            Some(i) => {
                inner.entries[i].1.drained = drained;
                true
            }
            None => false,
        }
    }

    pub fn drain_all(&self) {
        let mut inner = self.inner.write();
        for (_, e) in inner.entries.iter_mut() {
            e.drained = true;
        }
    }

    pub fn undrain_all(&self) {
        let mut inner = self.inner.write();
        for (_, e) in inner.entries.iter_mut() {
            e.drained = false;
        }
    }

    /// Replaces the live-client list for a backend wholesale. A report for
    /// an unknown backend is dropped silently (the backend must `!join`
    /// first); this mirrors "a malformed report is dropped".
    pub fn set_report(&self, backend: &Backend, clients: Vec<LiveClient>) -> bool {
        let mut inner = self.inner.write();
        match inner.index_of(backend) {
            Some(i) => {
                inner.entries[i].1.live_clients = Some(clients);
                true
            }
            None => false,
        }
    }

    pub fn set_rtt(&self, backend: &Backend, rtt_ms: u64) -> bool {
        let mut inner = self.inner.write();
        match inner.index_of(backend) {
            Some(i) => {
                inner.entries[i].1.rtt_ms = Some(rtt_ms);
                true
            }
            None => false,
        }
    }

    pub fn ban_ip(&self, ip: impl Into<String>) {
        self.ban_ips.insert(ip.into());
    }

    pub fn ban_name(&self, name: impl Into<String>) {
        self.ban_names.insert(name.into());
    }

    pub fn unban_ip(&self, ip: &str) -> bool {
        self.ban_ips.remove(ip).is_some()
    }

    pub fn unban_name(&self, name: &str) -> bool {
        self.ban_names.remove(name).is_some()
    }

    pub fn is_banned(&self, ip: &str, name: &str) -> bool {
        self.ban_ips.contains(ip) || self.ban_names.contains(name)
    }

    pub fn banned_ips(&self) -> Vec<String> {
        self.ban_ips.iter().map(|r| r.clone()).collect()
    }

    pub fn banned_names(&self) -> Vec<String> {
        self.ban_names.iter().map(|r| r.clone()).collect()
    }

    /// A consistent point-in-time copy of the backend set, weights, drain
    /// flags, live counts and RTTs, plus the weighted schedule built from
    /// the same instant.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read();
        RegistrySnapshot {
            entries: inner.entries.clone(),
            schedule: inner.schedule.clone(),
        }
    }

    /// The shared round-robin cursor. Increments are unconditional;
    /// decisions about skipping a position are made by the caller.
    pub fn next_cursor(&self) -> u64 {
        self.rr_cursor.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_auto_name(&self) -> String {
        let n = self.client_counter.fetch_add(1, Ordering::Relaxed);
        format!("Client-{}", n)
    }

    pub fn record_assignment(&self, record: ClientRecord) {
        let mut log = self.assignments.lock();
        log.push_back(record);
        while log.len() > ASSIGNMENT_LOG_CAP {
            log.pop_front();
        }
    }

    pub fn recent_assignments(&self) -> Vec<ClientRecord> {
        self.assignments.lock().iter().cloned().collect()
    }

    pub fn clear_assignments(&self) {
        self.assignments.lock().clear();
    }
}
