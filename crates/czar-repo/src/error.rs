//! Error types for the repository layer.

use czar_game::{ErrorKind, GameError, GameId, PlayerId};

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// No game with this id is registered.
    #[error("game {0} not found")]
    GameNotFound(GameId),

    /// The game refused the operation.
    #[error(transparent)]
    Game(#[from] GameError),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GameNotFound(_) => ErrorKind::NotFound,
            Self::Game(e) => e.kind(),
        }
    }
}

/// Errors from the [`Authenticator`](crate::Authenticator).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No token was ever issued for this identity, or it was revoked.
    #[error("no token issued for player {player} in game {game}")]
    NotIssued { game: GameId, player: PlayerId },

    /// The token does not match the one issued.
    #[error("invalid token")]
    InvalidToken,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Authorization
    }
}
