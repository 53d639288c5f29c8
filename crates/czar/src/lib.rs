//! # Czar
//!
//! Real-time session engine for a judged party card game: each round one
//! player, the czar, reveals a black card, everyone else answers with white
//! cards from their hand, and the czar picks a winner.
//!
//! The crate wires the layers together:
//!
//! - [`ConnectionManager`] tracks live connections per game, supervises
//!   their heartbeat and fans messages out.
//! - [`ServerContext`] holds the repository, connections, authenticator and
//!   metrics, and exposes the calls an HTTP front end makes (create, join,
//!   leave).
//! - [`CzarServer`] binds the WebSocket transport and runs the accept loop
//!   and the eviction sweep.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use czar::prelude::*;
//!
//! # async fn run() -> Result<(), CzarError> {
//! let server = CzarServer::<TokenRegistry>::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(TokenRegistry::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod commands;
mod config;
mod connection;
mod error;
mod manager;
pub mod metrics;
mod server;

pub use config::{BIND_ADDR_ENV, HeartbeatConfig, PACKS_FILE_ENV, ServerConfig};
pub use connection::CloseReason;
pub use error::CzarError;
pub use manager::ConnectionManager;
pub use server::{ConnectParams, CzarServer, CzarServerBuilder, JoinTicket, ServerContext};

/// Commonly used types, re-exported for convenience.
pub mod prelude {
    pub use crate::metrics::{MetricEvent, Metrics, MetricsSink};
    pub use crate::{
        ConnectParams, ConnectionManager, CzarError, CzarServer, CzarServerBuilder,
        HeartbeatConfig, JoinTicket, ServerConfig, ServerContext,
    };
    pub use czar_game::{
        CardCatalog, CardId, ErrorKind, GameId, GameSettings, GameState, PlayerId,
    };
    pub use czar_protocol::{Command, MessageKind, RpcMessage, decode, encode};
    pub use czar_repo::{Authenticator, EvictionConfig, GameRepository, TokenRegistry};
    pub use czar_transport::{Connection, MemoryConnection, MemoryPeer};
}
