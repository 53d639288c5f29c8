//! Server configuration.

use std::time::Duration;

use czar_repo::EvictionConfig;

use crate::CzarError;

/// Overrides the bind address.
pub const BIND_ADDR_ENV: &str = "CZAR_BIND_ADDR";
/// Path to a card catalog in compact JSON, replacing the built-in packs.
pub const PACKS_FILE_ENV: &str = "CZAR_PACKS_FILE";

/// Per-connection liveness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often the supervisor checks the connection.
    pub tick: Duration,
    /// Silence after which the server sends a ping.
    pub ping_interval: Duration,
    /// Silence after which the connection is dropped.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            ping_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), CzarError> {
        if self.tick.is_zero() {
            return Err(CzarError::Config("heartbeat tick must be positive".into()));
        }
        if self.ping_interval >= self.timeout {
            return Err(CzarError::Config(format!(
                "ping interval {:?} must be shorter than timeout {:?}",
                self.ping_interval, self.timeout
            )));
        }
        Ok(())
    }
}

/// Everything the server needs at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub heartbeat: HeartbeatConfig,
    pub eviction: EvictionConfig,
    /// Pause between eviction passes.
    pub sweep_interval: Duration,
    /// How long the winning play stays on screen before the next round.
    pub winner_display: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            heartbeat: HeartbeatConfig::default(),
            eviction: EvictionConfig::default(),
            sweep_interval: Duration::from_secs(1),
            winner_display: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Defaults, with the bind address taken from [`BIND_ADDR_ENV`] when set.
    pub fn from_env() -> Result<Self, CzarError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CzarError> {
        if let Some(addr) = lookup(BIND_ADDR_ENV) {
            if addr.trim().is_empty() {
                return Err(CzarError::Config(format!("{BIND_ADDR_ENV} is empty")));
            }
            self.bind_addr = addr.trim().to_string();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn eviction(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn winner_display(mut self, display: Duration) -> Self {
        self.winner_display = display;
        self
    }

    pub fn validate(&self) -> Result<(), CzarError> {
        self.heartbeat.validate()?;
        if self.sweep_interval.is_zero() {
            return Err(CzarError::Config("sweep interval must be positive".into()));
        }
        Ok(())
    }
}
