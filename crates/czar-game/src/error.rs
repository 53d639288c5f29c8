//! Error types for the game layer.

use std::fmt;

use crate::{CardId, GameState, PackId, PlayerId};

/// Coarse classification shared by every error in the workspace.
///
/// Command errors and logs report this so a client can tell "you sent
/// something malformed" apart from "wrong moment to ask".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: settings, names, card counts.
    Validation,
    /// The operation is not legal in the current state.
    StateConflict,
    /// Unknown game, player, pack or card.
    NotFound,
    /// Wrong password, wrong role or an unverifiable identity.
    Authorization,
    /// Game full or not enough cards left.
    Capacity,
    /// Send/receive failure or heartbeat timeout.
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::StateConflict => "state_conflict",
            Self::NotFound => "not_found",
            Self::Authorization => "authorization",
            Self::Capacity => "capacity",
            Self::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Errors from the catalog and the deck.
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("no packs selected")]
    NoPacksSelected,

    #[error("unknown card pack {0}")]
    UnknownPack(PackId),

    #[error("unknown card {0}")]
    UnknownCard(CardId),

    #[error("black card {0} asks for zero cards or more than a hand holds")]
    InvalidBlackCard(CardId),

    #[error("the selected packs contain no white cards")]
    NoWhiteCards,

    #[error("the selected packs contain no black cards")]
    NoBlackCards,

    #[error("insufficient cards: requested {requested}, {remaining} remaining")]
    InsufficientCards { requested: usize, remaining: usize },

    #[error("invalid card catalog: {0}")]
    InvalidCatalog(#[from] serde_json::Error),
}

impl DeckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoPacksSelected | Self::InvalidBlackCard(_) | Self::InvalidCatalog(_) => {
                ErrorKind::Validation
            }
            Self::UnknownPack(_) | Self::UnknownCard(_) => ErrorKind::NotFound,
            Self::NoWhiteCards | Self::NoBlackCards | Self::InsufficientCards { .. } => {
                ErrorKind::Capacity
            }
        }
    }
}

/// A settings field outside its bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("max rounds must be in [{min}, {max}], got {got}")]
    MaxRounds { got: u32, min: u32, max: u32 },

    #[error("playing to points must be in [{min}, {max}], got {got}")]
    PlayingToPoints { got: u32, min: u32, max: u32 },

    #[error("max players must be in [{min}, {max}], got {got}")]
    MaxPlayers { got: u32, min: u32, max: u32 },

    #[error("password is {got} characters, the limit is {max}")]
    PasswordTooLong { got: usize, max: usize },

    #[error("at least one card pack is required")]
    NoCardPacks,
}

/// Errors that can occur during game operations.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error(transparent)]
    Deck(#[from] DeckError),

    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("name length out of [{min}, {max}]: {len}")]
    InvalidName { len: usize, min: usize, max: usize },

    #[error("name {0:?} is already taken")]
    DuplicateName(String),

    #[error("game is full ({0} players)")]
    GameFull(usize),

    #[error("max players {max} is below the current player count {players}")]
    TooManyPlayers { players: usize, max: u32 },

    #[error("player {0} not found")]
    PlayerNotFound(PlayerId),

    #[error("incorrect password")]
    WrongPassword,

    #[error("only the game owner can do that")]
    NotOwner,

    #[error("only the card czar can do that")]
    NotCzar,

    #[error("game already started")]
    AlreadyStarted,

    #[error("not allowed while the game is in state {actual}, expected {expected}")]
    WrongState { expected: GameState, actual: GameState },

    #[error("not enough players: {have} of {need}")]
    NotEnoughPlayers { have: usize, need: usize },

    #[error("the card czar cannot play cards")]
    CzarCannotPlay,

    #[error("expected {expected} cards, got {got}")]
    WrongCardCount { expected: usize, got: usize },

    #[error("a play must contain at least one card")]
    EmptyPlay,

    #[error("card {0} appears twice in the play")]
    DuplicateCardInPlay(CardId),

    #[error("card {0} is not in the player's hand")]
    CardNotInHand(CardId),

    #[error("card {0} is already in the player's hand")]
    DuplicateCard(CardId),

    #[error("player has already played this round")]
    AlreadyPlayed,

    #[error("no submitted play matches those cards")]
    NoSuchPlay,
}

impl GameError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Deck(e) => e.kind(),
            Self::Settings(_)
            | Self::InvalidName { .. }
            | Self::DuplicateName(_)
            | Self::WrongCardCount { .. }
            | Self::EmptyPlay
            | Self::DuplicateCardInPlay(_)
            | Self::DuplicateCard(_)
            | Self::NoSuchPlay => ErrorKind::Validation,
            Self::AlreadyStarted
            | Self::WrongState { .. }
            | Self::NotEnoughPlayers { .. }
            | Self::CzarCannotPlay
            | Self::AlreadyPlayed => ErrorKind::StateConflict,
            Self::PlayerNotFound(_) | Self::CardNotInHand(_) => ErrorKind::NotFound,
            Self::WrongPassword | Self::NotOwner | Self::NotCzar => ErrorKind::Authorization,
            Self::GameFull(_) | Self::TooManyPlayers { .. } => ErrorKind::Capacity,
        }
    }
}
