//! Process-wide, read-only card catalog.
//!
//! Card ids index the catalog, not a deck: the same id names the same card
//! in every game. Packs reference cards by id.
//!
//! The compact JSON format read by [`CardCatalog::from_json`]:
//!
//! ```json
//! {
//!   "white": ["answer text", ...],
//!   "black": [{ "text": "prompt _", "pick": 1 }, ...],
//!   "packs": [{ "name": "Base", "white": [0, 1], "black": [0] }]
//! }
//! ```
//!
//! Card ids are positions in `white` / `black`. Pack ids are derived from
//! the pack's position so they are stable across restarts.

use std::collections::HashMap;

use serde::Deserialize;
use uuid::Uuid;

use crate::{BlackCard, CardId, CardPack, DeckError, HAND_SIZE, PackId, WhiteCard};

const PACK_ID_BASE: u128 = 0x6361_7264_7061_636b_0000_0000_0000_0000;

/// Id of the first pack of any catalog.
pub const DEFAULT_PACK_ID: PackId = PackId(Uuid::from_u128(PACK_ID_BASE));

static BUILTIN_PACKS: &str = include_str!("../packs/default.json");

/// Derives the stable id of the pack at `index`.
pub fn pack_id_for_index(index: usize) -> PackId {
    PackId(Uuid::from_u128(PACK_ID_BASE + index as u128))
}

#[derive(Deserialize)]
struct CompactCatalog {
    white: Vec<String>,
    black: Vec<CompactBlack>,
    packs: Vec<CompactPack>,
}

#[derive(Deserialize)]
struct CompactBlack {
    text: String,
    pick: u32,
}

#[derive(Deserialize)]
struct CompactPack {
    name: String,
    #[serde(default)]
    white: Vec<u32>,
    #[serde(default)]
    black: Vec<u32>,
}

/// Immutable card definitions and packs, shared as `Arc<CardCatalog>`.
#[derive(Debug, Clone)]
pub struct CardCatalog {
    white: HashMap<CardId, WhiteCard>,
    black: HashMap<CardId, BlackCard>,
    packs: Vec<CardPack>,
}

impl CardCatalog {
    /// Builds a catalog, checking that every pack references known cards
    /// and every black card asks for between one and [`HAND_SIZE`] answers.
    pub fn new(
        white: Vec<WhiteCard>,
        black: Vec<BlackCard>,
        packs: Vec<CardPack>,
    ) -> Result<Self, DeckError> {
        if let Some(card) = black
            .iter()
            .find(|c| c.cards_to_play == 0 || c.cards_to_play as usize > HAND_SIZE)
        {
            return Err(DeckError::InvalidBlackCard(card.id));
        }
        let white: HashMap<_, _> = white.into_iter().map(|c| (c.id, c)).collect();
        let black: HashMap<_, _> = black.into_iter().map(|c| (c.id, c)).collect();

        for pack in &packs {
            if let Some(id) = pack.white.iter().find(|id| !white.contains_key(id)) {
                return Err(DeckError::UnknownCard(*id));
            }
            if let Some(id) = pack.black.iter().find(|id| !black.contains_key(id)) {
                return Err(DeckError::UnknownCard(*id));
            }
        }

        Ok(Self {
            white,
            black,
            packs,
        })
    }

    /// Parses the compact pack format.
    pub fn from_json(json: &str) -> Result<Self, DeckError> {
        let compact: CompactCatalog = serde_json::from_str(json)?;

        let white = compact
            .white
            .into_iter()
            .enumerate()
            .map(|(i, body_text)| WhiteCard {
                id: CardId(i as u32),
                body_text,
            })
            .collect();
        let black = compact
            .black
            .into_iter()
            .enumerate()
            .map(|(i, b)| BlackCard {
                id: CardId(i as u32),
                body_text: b.text,
                cards_to_play: b.pick,
            })
            .collect();
        let packs = compact
            .packs
            .into_iter()
            .enumerate()
            .map(|(i, p)| CardPack {
                id: pack_id_for_index(i),
                name: p.name,
                white: p.white.into_iter().map(CardId).collect(),
                black: p.black.into_iter().map(CardId).collect(),
            })
            .collect();

        Self::new(white, black, packs)
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, DeckError> {
        Self::from_json(BUILTIN_PACKS)
    }

    pub fn lookup_white(&self, id: CardId) -> Result<&WhiteCard, DeckError> {
        self.white.get(&id).ok_or(DeckError::UnknownCard(id))
    }

    pub fn lookup_black(&self, id: CardId) -> Result<&BlackCard, DeckError> {
        self.black.get(&id).ok_or(DeckError::UnknownCard(id))
    }

    pub fn pack(&self, id: PackId) -> Result<&CardPack, DeckError> {
        self.packs
            .iter()
            .find(|p| p.id == id)
            .ok_or(DeckError::UnknownPack(id))
    }

    pub fn packs(&self) -> &[CardPack] {
        &self.packs
    }

    /// The first pack, if the catalog has any.
    pub fn default_pack_id(&self) -> Option<PackId> {
        self.packs.first().map(|p| p.id)
    }
}
