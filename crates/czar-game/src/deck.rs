//! A shuffled play deck built from one or more packs.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;

use crate::{BlackCard, CardCatalog, DeckError, PackId, WhiteCard};

/// Cards still available to a single game.
///
/// Cards are dispensed without replacement: once a card leaves the deck it
/// never comes back for the lifetime of the game.
#[derive(Debug, Clone)]
pub struct Deck {
    white: Vec<WhiteCard>,
    black: Vec<BlackCard>,
}

impl Deck {
    /// Unions the packs, drops cards shared between packs and shuffles.
    pub fn new(catalog: &CardCatalog, packs: &[PackId]) -> Result<Self, DeckError> {
        if packs.is_empty() {
            return Err(DeckError::NoPacksSelected);
        }

        let mut white_ids = BTreeSet::new();
        let mut black_ids = BTreeSet::new();
        for id in packs {
            let pack = catalog.pack(*id)?;
            white_ids.extend(pack.white.iter().copied());
            black_ids.extend(pack.black.iter().copied());
        }
        if white_ids.is_empty() {
            return Err(DeckError::NoWhiteCards);
        }
        if black_ids.is_empty() {
            return Err(DeckError::NoBlackCards);
        }

        let mut white = white_ids
            .into_iter()
            .map(|id| catalog.lookup_white(id).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let mut black = black_ids
            .into_iter()
            .map(|id| catalog.lookup_black(id).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let mut rng = rand::rng();
        white.shuffle(&mut rng);
        black.shuffle(&mut rng);

        Ok(Self { white, black })
    }

    /// Takes `n` white cards off the deck.
    pub fn dispense_white(&mut self, n: usize) -> Result<Vec<WhiteCard>, DeckError> {
        if n > self.white.len() {
            return Err(DeckError::InsufficientCards {
                requested: n,
                remaining: self.white.len(),
            });
        }
        let at = self.white.len() - n;
        Ok(self.white.split_off(at))
    }

    /// Takes one black card off the deck.
    pub fn dispense_black(&mut self) -> Result<BlackCard, DeckError> {
        self.black.pop().ok_or(DeckError::InsufficientCards {
            requested: 1,
            remaining: 0,
        })
    }

    pub fn remaining_white(&self) -> usize {
        self.white.len()
    }

    pub fn remaining_black(&self) -> usize {
        self.black.len()
    }
}
