//! A registered connection and its liveness bookkeeping.

use std::fmt;

use czar_transport::Connection;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::HeartbeatConfig;

/// Why a connection's session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the socket.
    ClientClosed,
    /// Reading from the socket failed.
    ReadFailed(String),
    /// Sending to the socket failed.
    SendFailed,
    /// The client sent a frame that is not an envelope.
    Undecodable,
    /// No heartbeat arrived within the timeout.
    HeartbeatTimeout,
    /// The server tore the session down (leave, eviction, shutdown).
    Closed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed the connection"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::SendFailed => f.write_str("send failed"),
            Self::Undecodable => f.write_str("undecodable frame"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::Closed => f.write_str("closed by server"),
        }
    }
}

/// What the supervisor should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Alive,
    SendPing,
    TimedOut,
}

#[derive(Debug)]
struct Heartbeat {
    last_seen: Instant,
    last_ping: Option<Instant>,
}

/// One registered connection.
///
/// `serial` is unique per registration, so cleanup for a replaced
/// connection can tell it no longer owns the registry slot.
pub(crate) struct LiveConnection<C> {
    serial: u64,
    conn: C,
    joined_at: Instant,
    heartbeat: Mutex<Heartbeat>,
    cancel: CancellationToken,
}

impl<C: Connection> LiveConnection<C> {
    pub(crate) fn new(serial: u64, conn: C) -> Self {
        let now = Instant::now();
        Self {
            serial,
            conn,
            joined_at: now,
            heartbeat: Mutex::new(Heartbeat {
                last_seen: now,
                last_ping: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn conn(&self) -> &C {
        &self.conn
    }

    pub(crate) fn joined_at(&self) -> Instant {
        self.joined_at
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Records a heartbeat from the client.
    pub(crate) fn beat(&self, now: Instant) {
        let mut hb = self.heartbeat.lock();
        hb.last_seen = now;
        hb.last_ping = None;
    }

    /// Decides the tick's action. A ping is sent at most once per
    /// `ping_interval` while the client stays silent.
    pub(crate) fn check(&self, now: Instant, config: &HeartbeatConfig) -> Liveness {
        let mut hb = self.heartbeat.lock();
        let silent = now.saturating_duration_since(hb.last_seen);
        if silent >= config.timeout {
            return Liveness::TimedOut;
        }
        if silent < config.ping_interval {
            return Liveness::Alive;
        }
        let due = hb
            .last_ping
            .is_none_or(|at| now.saturating_duration_since(at) >= config.ping_interval);
        if due {
            hb.last_ping = Some(now);
            Liveness::SendPing
        } else {
            Liveness::Alive
        }
    }
}
