//! Game repository for czar.
//!
//! This crate owns the set of live games:
//!
//! 1. **Registry**: creating, finding and removing games ([`GameRepository`])
//! 2. **Eviction**: dropping games that sat idle too long ([`EvictionConfig`])
//! 3. **Authentication**: per-player connection tokens ([`Authenticator`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Server Layer (above)  ← routes commands, broadcasts results
//!     ↕
//! Repository Layer (this crate)  ← per-game locking, age index, tokens
//!     ↕
//! Game Layer (below)  ← the round state machine
//! ```

mod auth;
mod config;
mod error;
mod repository;

pub use auth::{Authenticator, TokenRegistry};
pub use config::EvictionConfig;
pub use error::{AuthError, RepoError};
pub use repository::{GameRepository, RepoMetrics, SharedGame};
