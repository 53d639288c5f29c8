//! Game domain for czar.
//!
//! Everything here is synchronous, lock-free data: the caller decides how a
//! [`Game`] is shared and serializes access to it.
//!
//! # Key types
//!
//! - [`CardCatalog`]: immutable card definitions and packs
//! - [`Deck`]: a game's shuffled draw piles
//! - [`Player`]: hand and in-flight play
//! - [`Game`]: the round state machine
//! - [`GameSettings`]: the owner's choices, validated as a unit

mod card;
pub mod catalog;
mod deck;
mod error;
mod game;
mod ids;
mod player;
pub mod settings;

pub use card::{BlackCard, CardPack, WhiteCard};
pub use catalog::{CardCatalog, DEFAULT_PACK_ID};
pub use deck::Deck;
pub use error::{DeckError, ErrorKind, GameError, SettingsError};
pub use game::{
    AgeClass, Game, GameInfo, GameMetrics, GameState, GameStateInfo, HAND_SIZE, JudgingPhase,
    MIN_PLAYERS_TO_START, Play, PlayResult, PlayerInfo, PlayerRemoval, RoundAdvance, RoundInfo,
    RoundStart, RoundWinner, Standing, UnknownGameState,
};
pub use ids::{CardId, GameId, PackId, PlayerId};
pub use player::Player;
pub use settings::GameSettings;
