//! Per-game settings.

use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_PACK_ID;
use crate::{PackId, SettingsError};

pub const MIN_ROUNDS: u32 = 1;
pub const MAX_ROUNDS: u32 = 100;
pub const MIN_PLAYING_TO_POINTS: u32 = 2;
pub const MAX_PLAYING_TO_POINTS: u32 = 50;
pub const MIN_PLAYERS: u32 = 3;
pub const MAX_PLAYERS: u32 = 20;
pub const MAX_PASSWORD_LEN: usize = 50;

/// Settings chosen by the game owner while the game is in the lobby.
///
/// Validated as a unit: a game only ever holds settings that passed
/// [`GameSettings::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    pub max_rounds: u32,
    pub playing_to_points: u32,
    /// Empty means the game is open.
    #[serde(default)]
    pub game_password: String,
    pub max_players: u32,
    pub card_packs: Vec<PackId>,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            max_rounds: MAX_ROUNDS,
            playing_to_points: 10,
            game_password: String::new(),
            max_players: 10,
            card_packs: vec![DEFAULT_PACK_ID],
        }
    }
}

impl GameSettings {
    /// Checks every field against its bounds.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&self.max_rounds) {
            return Err(SettingsError::MaxRounds {
                got: self.max_rounds,
                min: MIN_ROUNDS,
                max: MAX_ROUNDS,
            });
        }
        if !(MIN_PLAYING_TO_POINTS..=MAX_PLAYING_TO_POINTS).contains(&self.playing_to_points) {
            return Err(SettingsError::PlayingToPoints {
                got: self.playing_to_points,
                min: MIN_PLAYING_TO_POINTS,
                max: MAX_PLAYING_TO_POINTS,
            });
        }
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&self.max_players) {
            return Err(SettingsError::MaxPlayers {
                got: self.max_players,
                min: MIN_PLAYERS,
                max: MAX_PLAYERS,
            });
        }
        let password_len = self.game_password.chars().count();
        if password_len > MAX_PASSWORD_LEN {
            return Err(SettingsError::PasswordTooLong {
                got: password_len,
                max: MAX_PASSWORD_LEN,
            });
        }
        if self.card_packs.is_empty() {
            return Err(SettingsError::NoCardPacks);
        }
        Ok(())
    }

    pub fn has_password(&self) -> bool {
        !self.game_password.is_empty()
    }
}
