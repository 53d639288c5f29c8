//! Unified error type for the czar server.

use czar_game::{ErrorKind, GameError};
use czar_protocol::ProtocolError;
use czar_repo::{AuthError, RepoError};
use czar_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum CzarError {
    /// A transport-level error (connection, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, unknown type).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The game refused the operation.
    #[error(transparent)]
    Game(#[from] GameError),

    /// A repository-level error (unknown game, or a game refusal).
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// The connection's identity could not be verified.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The upgrade request did not carry a usable identity.
    #[error("bad connect request: {0}")]
    BadRequest(String),

    /// A configuration value could not be used.
    #[error("invalid config: {0}")]
    Config(String),
}

impl CzarError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) | Self::BadRequest(_) | Self::Config(_) => ErrorKind::Validation,
            Self::Game(e) => e.kind(),
            Self::Repo(e) => e.kind(),
            Self::Auth(e) => e.kind(),
        }
    }
}
