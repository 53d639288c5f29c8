//! A player's hand and in-flight play.

use std::collections::{BTreeMap, HashSet};

use crate::{CardId, GameError, PlayerId, WhiteCard};

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 20;

/// One participant of a game. Owned by its [`Game`](crate::Game).
///
/// `current_play` is `None` until the player plays this round. Once the
/// round resolves it becomes `Some` of an empty list, which still counts
/// as played.
#[derive(Debug, Clone)]
pub struct Player {
    id: PlayerId,
    name: String,
    hand: BTreeMap<CardId, WhiteCard>,
    current_play: Option<Vec<WhiteCard>>,
    connected: bool,
    points: u32,
}

impl Player {
    /// Creates a player with a fresh id and an empty hand.
    pub fn new(name: impl Into<String>) -> Result<Self, GameError> {
        let name = name.into();
        let len = name.chars().count();
        if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
            return Err(GameError::InvalidName {
                len,
                min: MIN_NAME_LEN,
                max: MAX_NAME_LEN,
            });
        }
        Ok(Self {
            id: PlayerId::new(),
            name,
            hand: BTreeMap::new(),
            current_play: None,
            connected: true,
            points: 0,
        })
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> u32 {
        self.points
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn has_played(&self) -> bool {
        self.current_play.is_some()
    }

    pub fn hand_len(&self) -> usize {
        self.hand.len()
    }

    /// The hand, ordered by card id.
    pub fn hand(&self) -> impl Iterator<Item = &WhiteCard> {
        self.hand.values()
    }

    pub fn current_play(&self) -> Option<&[WhiteCard]> {
        self.current_play.as_deref()
    }

    pub fn add_to_hand(&mut self, card: WhiteCard) -> Result<(), GameError> {
        if self.hand.contains_key(&card.id) {
            return Err(GameError::DuplicateCard(card.id));
        }
        self.hand.insert(card.id, card);
        Ok(())
    }

    /// Moves the named cards from the hand into the current play, in the
    /// order given.
    ///
    /// Every check runs before the hand is touched, so a rejected play
    /// leaves the player unchanged.
    pub fn play(&mut self, card_ids: &[CardId]) -> Result<(), GameError> {
        if self.current_play.is_some() {
            return Err(GameError::AlreadyPlayed);
        }
        if card_ids.is_empty() {
            return Err(GameError::EmptyPlay);
        }
        let mut seen = HashSet::with_capacity(card_ids.len());
        for id in card_ids {
            if !seen.insert(*id) {
                return Err(GameError::DuplicateCardInPlay(*id));
            }
            if !self.hand.contains_key(id) {
                return Err(GameError::CardNotInHand(*id));
            }
        }

        let play = card_ids
            .iter()
            .filter_map(|id| self.hand.remove(id))
            .collect();
        self.current_play = Some(play);
        Ok(())
    }

    /// Resets to "has not played" for the next round.
    pub fn finalise_round(&mut self) {
        self.current_play = None;
    }

    /// Takes the submitted cards for judging, leaving an empty play behind.
    pub(crate) fn reveal_play(&mut self) -> Vec<WhiteCard> {
        self.current_play.replace(Vec::new()).unwrap_or_default()
    }

    /// Marks the round as resolved for a player who did not submit.
    pub(crate) fn mark_resolved(&mut self) {
        if self.current_play.is_none() {
            self.current_play = Some(Vec::new());
        }
    }

    /// Puts a withdrawn play back into the hand and clears the play.
    pub(crate) fn return_play_to_hand(&mut self) {
        if let Some(cards) = self.current_play.take() {
            for card in cards {
                self.hand.insert(card.id, card);
            }
        }
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub(crate) fn add_point(&mut self) {
        self.points += 1;
    }
}
