//! Card value objects.

use serde::{Deserialize, Serialize};

use crate::{CardId, PackId};

/// An answer card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteCard {
    pub id: CardId,
    pub body_text: String,
}

/// A prompt card. `cards_to_play` is how many white cards each player
/// submits against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlackCard {
    pub id: CardId,
    pub body_text: String,
    pub cards_to_play: u32,
}

/// A named selection of cards from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPack {
    pub id: PackId,
    pub name: String,
    pub white: Vec<CardId>,
    pub black: Vec<CardId>,
}
