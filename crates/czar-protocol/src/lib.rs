//! Wire protocol for czar.
//!
//! This crate defines the messages client and server exchange and how they
//! become bytes:
//!
//! - **Kinds** ([`MessageKind`]): the stable integer in every envelope.
//! - **Messages** ([`RpcMessage`], [`Command`]): one payload struct per kind.
//! - **Codec** ([`encode`], [`decode`], [`decode_command`]): the
//!   `{"type": <int>, "data": {...}}` JSON envelope.
//!
//! # Architecture
//!
//! The protocol sits between transport (raw frames) and the connection
//! manager. It knows the game's snapshot types, but nothing about
//! connections or locks.
//!
//! ```text
//! Transport (bytes) → Protocol (RpcMessage / Command) → Connection manager
//! ```

mod error;
mod message;

pub use error::ProtocolError;
pub use message::{
    ChangeSettings, Command, CommandError, CzarSelectCard, MessageKind, NewOwner, OnCardPlayed,
    OnCzarJudgingPhase, OnGameEnd, OnJoin, OnPlayerCreate, OnPlayerDisconnect, OnPlayerJoin,
    OnPlayerLeave, OnWhiteCardPlayPhase, Ping, PlayCards, RoundInformation, RpcMessage,
    StartGame, decode, decode_command, encode,
};
