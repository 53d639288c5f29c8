//! Authentication boundary for connection upgrades.
//!
//! The session engine never looks inside a token. It asks an
//! [`Authenticator`] whether a `(game, player, token)` triple is valid and
//! trusts the answer. [`TokenRegistry`] is the in-memory implementation:
//! it hands out random tokens when a player is created and checks them
//! when that player's client opens a connection.

use std::collections::HashMap;
use std::future::Future;

use czar_game::{GameId, PlayerId};
use parking_lot::Mutex;
use rand::Rng;

use crate::AuthError;

/// Issues and verifies per-player connection tokens.
pub trait Authenticator: Send + Sync + 'static {
    /// Issues a fresh token for the identity, replacing any earlier one.
    fn issue_token(&self, game: GameId, player: PlayerId) -> String;

    /// Checks that `token` is the one issued for the identity.
    fn verify_token(
        &self,
        game: GameId,
        player: PlayerId,
        token: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Forgets the identity's token. Unknown identities are ignored.
    fn revoke(&self, game: GameId, player: PlayerId);

    /// Forgets every token of a game.
    fn revoke_game(&self, game: GameId);
}

/// In-memory [`Authenticator`] with random 128-bit hex tokens.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: Mutex<HashMap<(GameId, PlayerId), String>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

impl Authenticator for TokenRegistry {
    fn issue_token(&self, game: GameId, player: PlayerId) -> String {
        let token = generate_token();
        self.tokens.lock().insert((game, player), token.clone());
        token
    }

    async fn verify_token(
        &self,
        game: GameId,
        player: PlayerId,
        token: &str,
    ) -> Result<(), AuthError> {
        match self.tokens.lock().get(&(game, player)) {
            None => Err(AuthError::NotIssued { game, player }),
            Some(issued) if issued == token => Ok(()),
            Some(_) => Err(AuthError::InvalidToken),
        }
    }

    fn revoke(&self, game: GameId, player: PlayerId) {
        self.tokens.lock().remove(&(game, player));
    }

    fn revoke_game(&self, game: GameId) {
        self.tokens.lock().retain(|(g, _), _| *g != game);
    }
}

/// 16 random bytes as 32 lowercase hex characters.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
