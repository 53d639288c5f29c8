//! The per-game state machine.
//!
//! ```text
//! Lobby → WhiteCardsBeingSelected → CzarJudgingCards → DisplayingWinningCard
//!                    ↑                                          │
//!                    └──────────────────────────────────────────┤
//!                                                               ↓
//!                                                            GameOver
//! ```
//!
//! A [`Game`] is plain data with `&mut self` operations. The caller owns
//! the lock around it (one lock per game, never a global one) and holds it
//! for the full duration of each operation. Nothing in here awaits.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    BlackCard, CardCatalog, CardId, Deck, DeckError, GameError, GameId, GameSettings, Player,
    PlayerId, WhiteCard,
};

/// White cards each player holds at the start of a round.
pub const HAND_SIZE: usize = 7;

/// Players required before the owner can start.
pub const MIN_PLAYERS_TO_START: usize = 3;

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// Lifecycle state of a game. Serialized as its stable wire integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum GameState {
    Lobby,
    WhiteCardsBeingSelected,
    CzarJudgingCards,
    DisplayingWinningCard,
    GameOver,
}

/// A wire integer that names no [`GameState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown game state {0}")]
pub struct UnknownGameState(pub u8);

impl From<GameState> for u8 {
    fn from(state: GameState) -> Self {
        match state {
            GameState::Lobby => 1,
            GameState::WhiteCardsBeingSelected => 2,
            GameState::CzarJudgingCards => 3,
            GameState::DisplayingWinningCard => 4,
            GameState::GameOver => 5,
        }
    }
}

impl TryFrom<u8> for GameState {
    type Error = UnknownGameState;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Lobby),
            2 => Ok(Self::WhiteCardsBeingSelected),
            3 => Ok(Self::CzarJudgingCards),
            4 => Ok(Self::DisplayingWinningCard),
            5 => Ok(Self::GameOver),
            other => Err(UnknownGameState(other)),
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lobby => "Lobby",
            Self::WhiteCardsBeingSelected => "WhiteCardsBeingSelected",
            Self::CzarJudgingCards => "CzarJudgingCards",
            Self::DisplayingWinningCard => "DisplayingWinningCard",
            Self::GameOver => "GameOver",
        };
        f.write_str(name)
    }
}

/// Eviction class of a game, see the repository sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgeClass {
    /// A round is running and someone is connected.
    InProgress,
    /// Waiting in the lobby (or finished) with someone connected.
    Lobby,
    /// Nobody connected.
    NoPlayers,
}

impl AgeClass {
    pub const ALL: [AgeClass; 3] = [Self::InProgress, Self::Lobby, Self::NoPlayers];

    pub fn index(self) -> usize {
        match self {
            Self::InProgress => 0,
            Self::Lobby => 1,
            Self::NoPlayers => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// What every player needs to know when a round opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStart {
    pub black_card: BlackCard,
    pub card_czar_id: PlayerId,
    pub round_number: u32,
    /// Every player's hand, in join order.
    pub hands: Vec<(PlayerId, Vec<WhiteCard>)>,
}

impl RoundStart {
    pub fn hand_of(&self, player: PlayerId) -> Option<&[WhiteCard]> {
        self.hands
            .iter()
            .find(|(id, _)| *id == player)
            .map(|(_, hand)| hand.as_slice())
    }
}

/// One player's submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    pub player_id: PlayerId,
    pub cards: Vec<WhiteCard>,
}

/// Snapshot taken when the game moves to `CzarJudgingCards`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgingPhase {
    /// One entry per non-czar player, in shuffled order.
    pub plays: Vec<Play>,
    /// Every player's hand after it was topped up.
    pub hands: Vec<(PlayerId, Vec<WhiteCard>)>,
}

impl JudgingPhase {
    /// The plays without their authors, as shown to the table.
    pub fn anonymous_plays(&self) -> Vec<Vec<WhiteCard>> {
        self.plays.iter().map(|p| p.cards.clone()).collect()
    }

    pub fn hand_of(&self, player: PlayerId) -> Option<&[WhiteCard]> {
        self.hands
            .iter()
            .find(|(id, _)| *id == player)
            .map(|(_, hand)| hand.as_slice())
    }
}

/// Result of [`Game::play_cards`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayResult {
    pub moved_to_next_card_czar_phase: bool,
    pub judging: Option<JudgingPhase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundWinner {
    pub winner_id: PlayerId,
    pub cards: Vec<WhiteCard>,
    /// The winner's score after this round.
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub player_id: PlayerId,
    pub name: String,
    pub points: u32,
}

/// Result of [`Game::advance_round`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundAdvance {
    NextRound(RoundStart),
    /// Final standings, highest score first.
    GameOver(Vec<Standing>),
}

/// Result of [`Game::remove_player`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerRemoval {
    /// Set when the owner left and someone remains.
    pub new_owner: Option<PlayerId>,
    pub players_left: usize,
    /// Set when the czar left and someone remains.
    pub new_czar: Option<PlayerId>,
    /// Set when the running round had to start over.
    pub restarted_round: Option<RoundStart>,
    /// Set when the departure completed the round's plays.
    pub judging: Option<JudgingPhase>,
}

/// Lobby-listing view of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub id: GameId,
    pub player_count: usize,
    pub max_players: u32,
    pub playing_to_points: u32,
    pub has_password: bool,
    pub game_state: GameState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub points: u32,
    pub connected: bool,
    pub has_played: bool,
}

/// The requesting player's view of the current round.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundInfo {
    pub your_hand: Vec<WhiteCard>,
    pub your_play: Option<Vec<WhiteCard>>,
    pub players_played: Vec<PlayerId>,
    /// Revealed plays, only while judging or showing the winner.
    pub plays: Vec<Vec<WhiteCard>>,
    pub winner: Option<RoundWinner>,
}

/// Full state pushed to a (re)connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateInfo {
    pub id: GameId,
    pub settings: GameSettings,
    /// Unix milliseconds.
    pub creation_time: u64,
    pub game_state: GameState,
    pub game_owner_id: PlayerId,
    pub current_card_czar_id: Option<PlayerId>,
    pub round: u32,
    pub current_black_card: Option<BlackCard>,
    pub players: Vec<PlayerInfo>,
    pub round_info: RoundInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMetrics {
    pub player_count: usize,
    pub connected_count: usize,
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// One isolated match.
#[derive(Debug)]
pub struct Game {
    id: GameId,
    catalog: Arc<CardCatalog>,
    settings: GameSettings,
    player_order: Vec<PlayerId>,
    players: HashMap<PlayerId, Player>,
    owner_id: PlayerId,
    czar_id: PlayerId,
    /// Set when the czar left after judging. The successor already holds
    /// `czar_id` and serves the next round.
    czar_handed_over: bool,
    current_round: u32,
    current_black_card: Option<BlackCard>,
    state: GameState,
    deck: Option<Deck>,
    round_plays: Vec<Play>,
    last_winner: Option<RoundWinner>,
    creation_time: SystemTime,
    created_at: Instant,
    last_action: Instant,
}

impl Game {
    /// Creates a game in `Lobby` whose only player is its owner.
    pub fn new(
        catalog: Arc<CardCatalog>,
        settings: GameSettings,
        owner_name: impl Into<String>,
    ) -> Result<Self, GameError> {
        settings.validate()?;
        for pack in &settings.card_packs {
            catalog.pack(*pack)?;
        }
        let owner = Player::new(owner_name)?;
        let owner_id = owner.id();
        let now = Instant::now();

        Ok(Self {
            id: GameId::new(),
            catalog,
            settings,
            player_order: vec![owner_id],
            players: HashMap::from([(owner_id, owner)]),
            owner_id,
            czar_id: owner_id,
            czar_handed_over: false,
            current_round: 0,
            current_black_card: None,
            state: GameState::Lobby,
            deck: None,
            round_plays: Vec::new(),
            last_winner: None,
            creation_time: SystemTime::now(),
            created_at: now,
            last_action: now,
        })
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn owner_id(&self) -> PlayerId {
        self.owner_id
    }

    /// The czar, once the game has started.
    pub fn czar_id(&self) -> Option<PlayerId> {
        (self.state != GameState::Lobby).then_some(self.czar_id)
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn current_black_card(&self) -> Option<&BlackCard> {
        self.current_black_card.as_ref()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn contains_player(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    /// Players in join order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.player_order.iter().filter_map(|id| self.players.get(id))
    }

    pub fn player_count(&self) -> usize {
        self.player_order.len()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_action(&self) -> Instant {
        self.last_action
    }

    pub fn age_class(&self) -> AgeClass {
        if !self.players.values().any(Player::is_connected) {
            AgeClass::NoPlayers
        } else if matches!(self.state, GameState::Lobby | GameState::GameOver) {
            AgeClass::Lobby
        } else {
            AgeClass::InProgress
        }
    }

    pub fn check_password(&self, password: &str) -> Result<(), GameError> {
        if self.settings.game_password != password {
            return Err(GameError::WrongPassword);
        }
        Ok(())
    }

    pub fn ensure_owner(&self, player: PlayerId) -> Result<(), GameError> {
        if !self.players.contains_key(&player) {
            return Err(GameError::PlayerNotFound(player));
        }
        if self.owner_id != player {
            return Err(GameError::NotOwner);
        }
        Ok(())
    }

    /// Adds a player. Legal in every state; a player joining mid-round is
    /// dealt a full hand and must still play this round.
    pub fn add_player(&mut self, name: impl Into<String>) -> Result<PlayerId, GameError> {
        let name = name.into();
        if self.players.len() >= self.settings.max_players as usize {
            return Err(GameError::GameFull(self.players.len()));
        }
        if self.players.values().any(|p| p.name() == name) {
            return Err(GameError::DuplicateName(name));
        }
        let mut player = Player::new(name)?;
        let id = player.id();

        match self.state {
            GameState::Lobby | GameState::GameOver => {}
            GameState::WhiteCardsBeingSelected => self.deal_into(&mut player)?,
            GameState::CzarJudgingCards | GameState::DisplayingWinningCard => {
                self.deal_into(&mut player)?;
                player.mark_resolved();
            }
        }

        self.player_order.push(id);
        self.players.insert(id, player);
        self.touch();
        tracing::debug!(game_id = %self.id, player_id = %id, "player added");
        Ok(id)
    }

    /// Removes a player and repairs owner, czar and round state around the
    /// hole they leave.
    pub fn remove_player(&mut self, id: PlayerId) -> Result<PlayerRemoval, GameError> {
        let index = self
            .player_order
            .iter()
            .position(|p| *p == id)
            .ok_or(GameError::PlayerNotFound(id))?;
        self.player_order.remove(index);
        self.players.remove(&id);
        self.touch();

        let mut removal = PlayerRemoval {
            players_left: self.player_order.len(),
            ..PlayerRemoval::default()
        };
        if self.player_order.is_empty() {
            return Ok(removal);
        }

        if self.owner_id == id {
            if let Some(owner) = self.player_order.choose(&mut rand::rng()) {
                self.owner_id = *owner;
                removal.new_owner = Some(*owner);
            }
        }

        if self.czar_id == id {
            // The player who followed the czar in join order now sits at
            // `index`.
            let next = self.player_order[index % self.player_order.len()];
            self.czar_id = next;
            removal.new_czar = Some(next);
            match self.state {
                GameState::WhiteCardsBeingSelected | GameState::CzarJudgingCards => {
                    removal.restarted_round = Some(self.restart_round()?);
                }
                GameState::DisplayingWinningCard => self.czar_handed_over = true,
                GameState::Lobby | GameState::GameOver => {}
            }
            return Ok(removal);
        }

        match self.state {
            GameState::WhiteCardsBeingSelected if self.ready_for_judging() => {
                removal.judging = Some(self.enter_judging()?);
            }
            GameState::CzarJudgingCards => {
                self.round_plays.retain(|p| p.player_id != id);
                if self.round_plays.is_empty() {
                    removal.restarted_round = Some(self.restart_round()?);
                }
            }
            _ => {}
        }
        Ok(removal)
    }

    pub fn set_connected(&mut self, id: PlayerId, connected: bool) -> Result<(), GameError> {
        let player = self
            .players
            .get_mut(&id)
            .ok_or(GameError::PlayerNotFound(id))?;
        player.set_connected(connected);
        self.touch();
        Ok(())
    }

    /// Replaces the settings. Only legal in the lobby; a rejected change
    /// leaves the old settings in place.
    pub fn change_settings(&mut self, settings: GameSettings) -> Result<(), GameError> {
        if self.state != GameState::Lobby {
            return Err(GameError::AlreadyStarted);
        }
        settings.validate()?;
        for pack in &settings.card_packs {
            self.catalog.pack(*pack)?;
        }
        if (settings.max_players as usize) < self.players.len() {
            return Err(GameError::TooManyPlayers {
                players: self.players.len(),
                max: settings.max_players,
            });
        }
        self.settings = settings;
        self.touch();
        Ok(())
    }

    /// Builds the deck, deals every hand and opens round 1.
    ///
    /// The deck is assembled and checked before any player is touched.
    pub fn start_game(&mut self) -> Result<RoundStart, GameError> {
        if self.state != GameState::Lobby {
            return Err(GameError::AlreadyStarted);
        }
        let have = self.player_order.len();
        if have < MIN_PLAYERS_TO_START {
            return Err(GameError::NotEnoughPlayers {
                have,
                need: MIN_PLAYERS_TO_START,
            });
        }

        let mut deck = Deck::new(&self.catalog, &self.settings.card_packs)?;
        let needed = have * HAND_SIZE;
        if deck.remaining_white() < needed {
            return Err(DeckError::InsufficientCards {
                requested: needed,
                remaining: deck.remaining_white(),
            }
            .into());
        }
        let black = deck.dispense_black()?;
        let mut hands = Vec::with_capacity(have);
        for id in &self.player_order {
            hands.push((*id, deck.dispense_white(HAND_SIZE)?));
        }

        for (id, cards) in hands {
            if let Some(player) = self.players.get_mut(&id) {
                player.finalise_round();
                for card in cards {
                    player.add_to_hand(card)?;
                }
            }
        }
        self.deck = Some(deck);
        self.current_black_card = Some(black);
        self.czar_id = self.player_order[0];
        self.czar_handed_over = false;
        self.current_round = 1;
        self.state = GameState::WhiteCardsBeingSelected;
        self.touch();

        tracing::debug!(game_id = %self.id, czar = %self.czar_id, "game started");
        self.round_start()
    }

    /// Submits a player's white cards for the current black card.
    ///
    /// Once every non-czar player has played, connected or not, the game
    /// moves to `CzarJudgingCards` and the result carries the snapshot.
    pub fn play_cards(
        &mut self,
        player_id: PlayerId,
        card_ids: &[CardId],
    ) -> Result<PlayResult, GameError> {
        self.require_state(GameState::WhiteCardsBeingSelected)?;
        if !self.players.contains_key(&player_id) {
            return Err(GameError::PlayerNotFound(player_id));
        }
        if player_id == self.czar_id {
            return Err(GameError::CzarCannotPlay);
        }
        let expected = self
            .current_black_card
            .as_ref()
            .map_or(0, |c| c.cards_to_play as usize);
        if card_ids.len() != expected {
            return Err(GameError::WrongCardCount {
                expected,
                got: card_ids.len(),
            });
        }

        let player = self
            .players
            .get_mut(&player_id)
            .ok_or(GameError::PlayerNotFound(player_id))?;
        player.play(card_ids)?;
        self.touch();

        if self.ready_for_judging() {
            let judging = self.enter_judging()?;
            Ok(PlayResult {
                moved_to_next_card_czar_phase: true,
                judging: Some(judging),
            })
        } else {
            Ok(PlayResult {
                moved_to_next_card_czar_phase: false,
                judging: None,
            })
        }
    }

    /// The czar picks the winning play by its cards, in any order.
    pub fn czar_select(
        &mut self,
        player_id: PlayerId,
        card_ids: &[CardId],
    ) -> Result<RoundWinner, GameError> {
        self.require_state(GameState::CzarJudgingCards)?;
        if !self.players.contains_key(&player_id) {
            return Err(GameError::PlayerNotFound(player_id));
        }
        if player_id != self.czar_id {
            return Err(GameError::NotCzar);
        }

        let wanted: BTreeSet<CardId> = card_ids.iter().copied().collect();
        let play = self
            .round_plays
            .iter()
            .find(|play| {
                play.cards.len() == card_ids.len()
                    && wanted.len() == card_ids.len()
                    && play.cards.iter().all(|c| wanted.contains(&c.id))
            })
            .cloned()
            .ok_or(GameError::NoSuchPlay)?;

        let winner = self
            .players
            .get_mut(&play.player_id)
            .ok_or(GameError::PlayerNotFound(play.player_id))?;
        winner.add_point();
        let result = RoundWinner {
            winner_id: play.player_id,
            cards: play.cards,
            points: winner.points(),
        };

        self.last_winner = Some(result.clone());
        self.state = GameState::DisplayingWinningCard;
        self.touch();
        tracing::debug!(game_id = %self.id, winner = %result.winner_id, "round won");
        Ok(result)
    }

    /// Leaves `DisplayingWinningCard`: either opens the next round with the
    /// next czar or ends the game.
    pub fn advance_round(&mut self) -> Result<RoundAdvance, GameError> {
        self.require_state(GameState::DisplayingWinningCard)?;
        self.touch();

        let target = self.settings.playing_to_points;
        let someone_won = self.players.values().any(|p| p.points() >= target);
        let out_of_rounds = self.current_round >= self.settings.max_rounds;
        let next_black = match self.deck.as_mut() {
            Some(deck) if !someone_won && !out_of_rounds => deck.dispense_black().ok(),
            _ => None,
        };
        let Some(black) = next_black else {
            self.state = GameState::GameOver;
            self.round_plays.clear();
            for player in self.players.values_mut() {
                player.finalise_round();
            }
            tracing::debug!(game_id = %self.id, round = self.current_round, "game over");
            return Ok(RoundAdvance::GameOver(self.standings()));
        };

        for player in self.players.values_mut() {
            player.finalise_round();
        }
        self.round_plays.clear();
        self.last_winner = None;
        self.refill_hands()?;

        if !std::mem::take(&mut self.czar_handed_over) {
            let next = self
                .player_order
                .iter()
                .position(|id| *id == self.czar_id)
                .map_or(0, |i| (i + 1) % self.player_order.len());
            self.czar_id = self.player_order[next];
        }
        self.current_black_card = Some(black);
        self.current_round += 1;
        self.state = GameState::WhiteCardsBeingSelected;

        Ok(RoundAdvance::NextRound(self.round_start()?))
    }

    pub fn info(&self) -> GameInfo {
        GameInfo {
            id: self.id,
            player_count: self.players.len(),
            max_players: self.settings.max_players,
            playing_to_points: self.settings.playing_to_points,
            has_password: self.settings.has_password(),
            game_state: self.state,
        }
    }

    /// Snapshot for one player. Contains only that player's own hand.
    pub fn state_info(&self, requester: PlayerId) -> Result<GameStateInfo, GameError> {
        let me = self
            .players
            .get(&requester)
            .ok_or(GameError::PlayerNotFound(requester))?;
        let started = self.state != GameState::Lobby;

        let players = self
            .players()
            .map(|p| PlayerInfo {
                id: p.id(),
                name: p.name().to_owned(),
                points: p.points(),
                connected: p.is_connected(),
                has_played: started && p.id() != self.czar_id && p.has_played(),
            })
            .collect::<Vec<_>>();
        let players_played = players
            .iter()
            .filter(|p| p.has_played)
            .map(|p| p.id)
            .collect();
        let plays = match self.state {
            GameState::CzarJudgingCards | GameState::DisplayingWinningCard => {
                self.round_plays.iter().map(|p| p.cards.clone()).collect()
            }
            _ => Vec::new(),
        };

        Ok(GameStateInfo {
            id: self.id,
            settings: self.settings.clone(),
            creation_time: unix_millis(self.creation_time),
            game_state: self.state,
            game_owner_id: self.owner_id,
            current_card_czar_id: self.czar_id(),
            round: self.current_round,
            current_black_card: self.current_black_card.clone(),
            players,
            round_info: RoundInfo {
                your_hand: me.hand().cloned().collect(),
                your_play: me.current_play().map(<[WhiteCard]>::to_vec),
                players_played,
                plays,
                winner: self.last_winner.clone(),
            },
        })
    }

    pub fn metrics(&self) -> GameMetrics {
        GameMetrics {
            player_count: self.players.len(),
            connected_count: self.players.values().filter(|p| p.is_connected()).count(),
        }
    }

    /// Final ranking, highest score first, ties in join order.
    pub fn standings(&self) -> Vec<Standing> {
        let mut standings: Vec<_> = self
            .players()
            .map(|p| Standing {
                player_id: p.id(),
                name: p.name().to_owned(),
                points: p.points(),
            })
            .collect();
        standings.sort_by(|a, b| b.points.cmp(&a.points));
        standings
    }

    fn touch(&mut self) {
        self.last_action = Instant::now();
    }

    fn require_state(&self, expected: GameState) -> Result<(), GameError> {
        if self.state != expected {
            return Err(GameError::WrongState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// True when at least one non-czar player exists and all of them have
    /// played.
    fn ready_for_judging(&self) -> bool {
        let mut others = self
            .players
            .values()
            .filter(|p| p.id() != self.czar_id)
            .peekable();
        others.peek().is_some() && others.all(Player::has_played)
    }

    fn enter_judging(&mut self) -> Result<JudgingPhase, GameError> {
        let mut plays = Vec::new();
        for id in &self.player_order {
            let Some(player) = self.players.get_mut(id) else {
                continue;
            };
            if *id == self.czar_id {
                player.mark_resolved();
            } else {
                plays.push(Play {
                    player_id: *id,
                    cards: player.reveal_play(),
                });
            }
        }
        plays.shuffle(&mut rand::rng());
        self.round_plays = plays.clone();
        self.refill_hands()?;
        self.state = GameState::CzarJudgingCards;
        tracing::debug!(game_id = %self.id, plays = plays.len(), "czar judging");

        Ok(JudgingPhase {
            plays,
            hands: self.hand_snapshot(),
        })
    }

    /// Withdraws outstanding plays and reopens white card selection with
    /// the current black card and czar.
    fn restart_round(&mut self) -> Result<RoundStart, GameError> {
        for player in self.players.values_mut() {
            player.return_play_to_hand();
        }
        self.round_plays.clear();
        self.refill_hands()?;
        self.state = GameState::WhiteCardsBeingSelected;
        tracing::debug!(game_id = %self.id, czar = %self.czar_id, "round restarted");
        self.round_start()
    }

    /// Tops every hand up to [`HAND_SIZE`] as far as the deck allows.
    fn refill_hands(&mut self) -> Result<(), GameError> {
        let Some(deck) = self.deck.as_mut() else {
            return Ok(());
        };
        for id in &self.player_order {
            let Some(player) = self.players.get_mut(id) else {
                continue;
            };
            let want = HAND_SIZE.saturating_sub(player.hand_len());
            let take = want.min(deck.remaining_white());
            for card in deck.dispense_white(take)? {
                player.add_to_hand(card)?;
            }
        }
        Ok(())
    }

    fn deal_into(&mut self, player: &mut Player) -> Result<(), GameError> {
        if let Some(deck) = self.deck.as_mut() {
            let take = HAND_SIZE.min(deck.remaining_white());
            for card in deck.dispense_white(take)? {
                player.add_to_hand(card)?;
            }
        }
        Ok(())
    }

    fn hand_snapshot(&self) -> Vec<(PlayerId, Vec<WhiteCard>)> {
        self.players()
            .map(|p| (p.id(), p.hand().cloned().collect()))
            .collect()
    }

    fn round_start(&self) -> Result<RoundStart, GameError> {
        let black_card = self
            .current_black_card
            .clone()
            .ok_or(GameError::WrongState {
                expected: GameState::WhiteCardsBeingSelected,
                actual: self.state,
            })?;
        Ok(RoundStart {
            black_card,
            card_czar_id: self.czar_id,
            round_number: self.current_round,
            hands: self.hand_snapshot(),
        })
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
