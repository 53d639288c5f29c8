//! Server counters.
//!
//! Components never bump globals. They hold an `Arc<dyn MetricsSink>` and
//! report [`MetricEvent`]s; [`Metrics`] is the default sink and folds them
//! into atomics. Rendering walks a fixed table of `(name, accessor)` pairs.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use czar_repo::RepoMetrics;

/// Something worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    ConnectionOpened,
    ConnectionClosed,
    /// The upgrade was refused before registration.
    ConnectionRejected,
    MessageReceived,
    MessageSent,
    SendFailed,
    /// A frame with a type the server does not handle.
    UnknownCommand,
    /// A command the game refused.
    CommandRejected,
    HeartbeatTimeout,
    GameEvicted,
}

/// Receives metric events from any task.
pub trait MetricsSink: Send + Sync + 'static {
    fn record(&self, event: MetricEvent);
}

/// Atomic counters for every [`MetricEvent`].
#[derive(Debug, Default)]
pub struct Metrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    connections_rejected: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    send_failures: AtomicU64,
    unknown_commands: AtomicU64,
    commands_rejected: AtomicU64,
    heartbeat_timeouts: AtomicU64,
    games_evicted: AtomicU64,
}

type Accessor = fn(&Metrics) -> u64;

const COUNTERS: &[(&str, Accessor)] = &[
    ("czar_connections_opened", |m| load(&m.connections_opened)),
    ("czar_connections_closed", |m| load(&m.connections_closed)),
    ("czar_connections_rejected", |m| load(&m.connections_rejected)),
    ("czar_messages_received", |m| load(&m.messages_received)),
    ("czar_messages_sent", |m| load(&m.messages_sent)),
    ("czar_send_failures", |m| load(&m.send_failures)),
    ("czar_unknown_commands", |m| load(&m.unknown_commands)),
    ("czar_commands_rejected", |m| load(&m.commands_rejected)),
    ("czar_heartbeat_timeouts", |m| load(&m.heartbeat_timeouts)),
    ("czar_games_evicted", |m| load(&m.games_evicted)),
];

const GAUGES: &[(&str, fn(&RepoMetrics) -> usize)] = &[
    ("czar_games", |r| r.games),
    ("czar_players", |r| r.players),
    ("czar_connected_players", |r| r.connected_players),
];

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, event: MetricEvent) -> &AtomicU64 {
        match event {
            MetricEvent::ConnectionOpened => &self.connections_opened,
            MetricEvent::ConnectionClosed => &self.connections_closed,
            MetricEvent::ConnectionRejected => &self.connections_rejected,
            MetricEvent::MessageReceived => &self.messages_received,
            MetricEvent::MessageSent => &self.messages_sent,
            MetricEvent::SendFailed => &self.send_failures,
            MetricEvent::UnknownCommand => &self.unknown_commands,
            MetricEvent::CommandRejected => &self.commands_rejected,
            MetricEvent::HeartbeatTimeout => &self.heartbeat_timeouts,
            MetricEvent::GameEvicted => &self.games_evicted,
        }
    }

    pub fn get(&self, event: MetricEvent) -> u64 {
        load(self.counter(event))
    }

    /// One `name value` line per counter, then the repository gauges.
    pub fn render(&self, repo: &RepoMetrics) -> String {
        let mut out = String::new();
        for (name, value) in COUNTERS {
            let _ = writeln!(out, "{name} {}", value(self));
        }
        for (name, value) in GAUGES {
            let _ = writeln!(out, "{name} {}", value(repo));
        }
        out
    }
}

impl MetricsSink for Metrics {
    fn record(&self, event: MetricEvent) {
        self.counter(event).fetch_add(1, Ordering::Relaxed);
    }
}
