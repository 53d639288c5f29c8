//! Message kinds, payloads and the envelope codec.
//!
//! On the wire every message is `{"type": <int>, "data": {...}}`. Decoding
//! happens in two steps: first the envelope is parsed with `data` left as
//! raw JSON, then `type` picks the payload struct `data` is parsed into.

use czar_game::{
    BlackCard, CardId, GameSettings, GameState, GameStateInfo, JudgingPhase, PlayerId, RoundStart,
    RoundWinner, Standing, WhiteCard,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The stable integer identifying a payload shape.
///
/// Tx kinds flow server → client, Rx kinds client → server. `Ping` flows
/// both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    OnJoin = 1,
    OnPlayerJoin = 2,
    OnPlayerCreate = 3,
    OnPlayerDisconnect = 4,
    OnPlayerLeave = 5,
    NewOwner = 6,
    CommandError = 7,
    ChangeSettings = 8,
    Ping = 9,
    StartGame = 10,
    RoundInformation = 11,
    PlayCards = 12,
    OnCardPlayed = 13,
    OnCzarJudgingPhase = 14,
    CzarSelectCard = 15,
    OnWhiteCardPlayPhase = 16,
    OnRoundWinner = 17,
    OnGameEnd = 18,
}

impl MessageKind {
    pub const ALL: [MessageKind; 18] = [
        Self::OnJoin,
        Self::OnPlayerJoin,
        Self::OnPlayerCreate,
        Self::OnPlayerDisconnect,
        Self::OnPlayerLeave,
        Self::NewOwner,
        Self::CommandError,
        Self::ChangeSettings,
        Self::Ping,
        Self::StartGame,
        Self::RoundInformation,
        Self::PlayCards,
        Self::OnCardPlayed,
        Self::OnCzarJudgingPhase,
        Self::CzarSelectCard,
        Self::OnWhiteCardPlayPhase,
        Self::OnRoundWinner,
        Self::OnGameEnd,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value).checked_sub(1)?).copied()
    }

    /// Looks up a `type` integer as read off the wire, which may be any
    /// JSON integer.
    pub fn from_wire(value: i64) -> Option<Self> {
        u8::try_from(value).ok().and_then(Self::from_u8)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether clients may send this kind.
    pub fn is_command(self) -> bool {
        matches!(
            self,
            Self::ChangeSettings
                | Self::Ping
                | Self::StartGame
                | Self::PlayCards
                | Self::CzarSelectCard
        )
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Full state, sent to a connection right after it registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnJoin {
    pub state: GameStateInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnPlayerJoin {
    pub id: PlayerId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnPlayerCreate {
    pub id: PlayerId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnPlayerDisconnect {
    pub id: PlayerId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnPlayerLeave {
    pub id: PlayerId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOwner {
    pub id: PlayerId,
}

/// Unicast to the sender of a command the server refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSettings {
    pub settings: GameSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ping {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartGame {}

/// One player's view of the running round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundInformation {
    pub round_number: u32,
    pub current_card_czar_id: PlayerId,
    pub black_card: BlackCard,
    pub your_hand: Vec<WhiteCard>,
    pub your_plays: Vec<WhiteCard>,
    /// Players who have played, including the recipient.
    pub total_plays: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayCards {
    pub card_ids: Vec<CardId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnCardPlayed {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnCzarJudgingPhase {
    /// Every play, without authors.
    pub all_plays: Vec<Vec<WhiteCard>>,
    /// The recipient's hand after it was topped up.
    pub new_hand: Vec<WhiteCard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CzarSelectCard {
    /// Card ids of the winning play, in any order.
    pub cards: Vec<CardId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnWhiteCardPlayPhase {
    pub black_card: BlackCard,
    pub your_hand: Vec<WhiteCard>,
    pub card_czar_id: PlayerId,
    pub round_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnGameEnd {
    pub standings: Vec<Standing>,
}

impl OnWhiteCardPlayPhase {
    /// The round opening as seen by `player`.
    pub fn for_player(start: &RoundStart, player: PlayerId) -> Self {
        Self {
            black_card: start.black_card.clone(),
            your_hand: start.hand_of(player).map(<[_]>::to_vec).unwrap_or_default(),
            card_czar_id: start.card_czar_id,
            round_number: start.round_number,
        }
    }
}

impl OnCzarJudgingPhase {
    /// The judging snapshot as seen by `player`.
    pub fn for_player(judging: &JudgingPhase, player: PlayerId) -> Self {
        Self {
            all_plays: judging.anonymous_plays(),
            new_hand: judging
                .hand_of(player)
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
        }
    }
}

impl RoundInformation {
    /// Derives the round view from a full state snapshot. `None` outside a
    /// running round.
    pub fn from_state(state: &GameStateInfo) -> Option<Self> {
        if matches!(state.game_state, GameState::Lobby | GameState::GameOver) {
            return None;
        }
        Some(Self {
            round_number: state.round,
            current_card_czar_id: state.current_card_czar_id?,
            black_card: state.current_black_card.clone()?,
            your_hand: state.round_info.your_hand.clone(),
            your_plays: state.round_info.your_play.clone().unwrap_or_default(),
            total_plays: state.round_info.players_played.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// RpcMessage
// ---------------------------------------------------------------------------

/// Every message that can travel in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMessage {
    OnJoin(OnJoin),
    OnPlayerJoin(OnPlayerJoin),
    OnPlayerCreate(OnPlayerCreate),
    OnPlayerDisconnect(OnPlayerDisconnect),
    OnPlayerLeave(OnPlayerLeave),
    NewOwner(NewOwner),
    CommandError(CommandError),
    ChangeSettings(ChangeSettings),
    Ping(Ping),
    StartGame(StartGame),
    RoundInformation(RoundInformation),
    PlayCards(PlayCards),
    OnCardPlayed(OnCardPlayed),
    OnCzarJudgingPhase(OnCzarJudgingPhase),
    CzarSelectCard(CzarSelectCard),
    OnWhiteCardPlayPhase(OnWhiteCardPlayPhase),
    OnRoundWinner(RoundWinner),
    OnGameEnd(OnGameEnd),
}

impl RpcMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::OnJoin(_) => MessageKind::OnJoin,
            Self::OnPlayerJoin(_) => MessageKind::OnPlayerJoin,
            Self::OnPlayerCreate(_) => MessageKind::OnPlayerCreate,
            Self::OnPlayerDisconnect(_) => MessageKind::OnPlayerDisconnect,
            Self::OnPlayerLeave(_) => MessageKind::OnPlayerLeave,
            Self::NewOwner(_) => MessageKind::NewOwner,
            Self::CommandError(_) => MessageKind::CommandError,
            Self::ChangeSettings(_) => MessageKind::ChangeSettings,
            Self::Ping(_) => MessageKind::Ping,
            Self::StartGame(_) => MessageKind::StartGame,
            Self::RoundInformation(_) => MessageKind::RoundInformation,
            Self::PlayCards(_) => MessageKind::PlayCards,
            Self::OnCardPlayed(_) => MessageKind::OnCardPlayed,
            Self::OnCzarJudgingPhase(_) => MessageKind::OnCzarJudgingPhase,
            Self::CzarSelectCard(_) => MessageKind::CzarSelectCard,
            Self::OnWhiteCardPlayPhase(_) => MessageKind::OnWhiteCardPlayPhase,
            Self::OnRoundWinner(_) => MessageKind::OnRoundWinner,
            Self::OnGameEnd(_) => MessageKind::OnGameEnd,
        }
    }

    pub fn command_error(reason: impl Into<String>) -> Self {
        Self::CommandError(CommandError {
            reason: reason.into(),
        })
    }

    pub fn ping() -> Self {
        Self::Ping(Ping {})
    }
}

/// A decoded client → server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ChangeSettings(GameSettings),
    Ping,
    StartGame,
    PlayCards(Vec<CardId>),
    CzarSelectCard(Vec<CardId>),
}

impl Command {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ChangeSettings(_) => MessageKind::ChangeSettings,
            Self::Ping => MessageKind::Ping,
            Self::StartGame => MessageKind::StartGame,
            Self::PlayCards(_) => MessageKind::PlayCards,
            Self::CzarSelectCard(_) => MessageKind::CzarSelectCard,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope codec
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    #[serde(rename = "type")]
    kind: u8,
    data: &'a T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(default)]
    data: serde_json::Value,
}

fn wrap<T: Serialize>(kind: MessageKind, data: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(&EnvelopeRef {
        kind: kind.as_u8(),
        data,
    })
    .map_err(ProtocolError::Encode)
}

fn payload<T: DeserializeOwned>(
    kind: MessageKind,
    data: serde_json::Value,
) -> Result<T, ProtocolError> {
    // Empty payloads may arrive as `null` or with `data` left out.
    let data = match data {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(data).map_err(|source| ProtocolError::Payload { kind, source })
}

fn parse_envelope(bytes: &[u8]) -> Result<(MessageKind, serde_json::Value), ProtocolError> {
    let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(ProtocolError::Decode)?;
    let kind = MessageKind::from_wire(raw.kind).ok_or(ProtocolError::UnknownType(raw.kind))?;
    Ok((kind, raw.data))
}

/// Encodes a message into its `{type, data}` envelope.
pub fn encode(msg: &RpcMessage) -> Result<Vec<u8>, ProtocolError> {
    let kind = msg.kind();
    match msg {
        RpcMessage::OnJoin(m) => wrap(kind, m),
        RpcMessage::OnPlayerJoin(m) => wrap(kind, m),
        RpcMessage::OnPlayerCreate(m) => wrap(kind, m),
        RpcMessage::OnPlayerDisconnect(m) => wrap(kind, m),
        RpcMessage::OnPlayerLeave(m) => wrap(kind, m),
        RpcMessage::NewOwner(m) => wrap(kind, m),
        RpcMessage::CommandError(m) => wrap(kind, m),
        RpcMessage::ChangeSettings(m) => wrap(kind, m),
        RpcMessage::Ping(m) => wrap(kind, m),
        RpcMessage::StartGame(m) => wrap(kind, m),
        RpcMessage::RoundInformation(m) => wrap(kind, m),
        RpcMessage::PlayCards(m) => wrap(kind, m),
        RpcMessage::OnCardPlayed(m) => wrap(kind, m),
        RpcMessage::OnCzarJudgingPhase(m) => wrap(kind, m),
        RpcMessage::CzarSelectCard(m) => wrap(kind, m),
        RpcMessage::OnWhiteCardPlayPhase(m) => wrap(kind, m),
        RpcMessage::OnRoundWinner(m) => wrap(kind, m),
        RpcMessage::OnGameEnd(m) => wrap(kind, m),
    }
}

/// Decodes any message kind.
pub fn decode(bytes: &[u8]) -> Result<RpcMessage, ProtocolError> {
    let (kind, data) = parse_envelope(bytes)?;
    let msg = match kind {
        MessageKind::OnJoin => RpcMessage::OnJoin(payload(kind, data)?),
        MessageKind::OnPlayerJoin => RpcMessage::OnPlayerJoin(payload(kind, data)?),
        MessageKind::OnPlayerCreate => RpcMessage::OnPlayerCreate(payload(kind, data)?),
        MessageKind::OnPlayerDisconnect => RpcMessage::OnPlayerDisconnect(payload(kind, data)?),
        MessageKind::OnPlayerLeave => RpcMessage::OnPlayerLeave(payload(kind, data)?),
        MessageKind::NewOwner => RpcMessage::NewOwner(payload(kind, data)?),
        MessageKind::CommandError => RpcMessage::CommandError(payload(kind, data)?),
        MessageKind::ChangeSettings => RpcMessage::ChangeSettings(payload(kind, data)?),
        MessageKind::Ping => RpcMessage::Ping(payload(kind, data)?),
        MessageKind::StartGame => RpcMessage::StartGame(payload(kind, data)?),
        MessageKind::RoundInformation => RpcMessage::RoundInformation(payload(kind, data)?),
        MessageKind::PlayCards => RpcMessage::PlayCards(payload(kind, data)?),
        MessageKind::OnCardPlayed => RpcMessage::OnCardPlayed(payload(kind, data)?),
        MessageKind::OnCzarJudgingPhase => RpcMessage::OnCzarJudgingPhase(payload(kind, data)?),
        MessageKind::CzarSelectCard => RpcMessage::CzarSelectCard(payload(kind, data)?),
        MessageKind::OnWhiteCardPlayPhase => {
            RpcMessage::OnWhiteCardPlayPhase(payload(kind, data)?)
        }
        MessageKind::OnRoundWinner => RpcMessage::OnRoundWinner(payload(kind, data)?),
        MessageKind::OnGameEnd => RpcMessage::OnGameEnd(payload(kind, data)?),
    };
    Ok(msg)
}

/// Decodes a frame sent by a client.
///
/// Kinds clients may not send are reported as
/// [`ProtocolError::UnknownType`], same as integers that name nothing.
pub fn decode_command(bytes: &[u8]) -> Result<Command, ProtocolError> {
    let (kind, data) = parse_envelope(bytes)?;
    let command = match kind {
        MessageKind::ChangeSettings => {
            Command::ChangeSettings(payload::<ChangeSettings>(kind, data)?.settings)
        }
        MessageKind::Ping => Command::Ping,
        MessageKind::StartGame => Command::StartGame,
        MessageKind::PlayCards => Command::PlayCards(payload::<PlayCards>(kind, data)?.card_ids),
        MessageKind::CzarSelectCard => {
            Command::CzarSelectCard(payload::<CzarSelectCard>(kind, data)?.cards)
        }
        other => return Err(ProtocolError::UnknownType(i64::from(other.as_u8()))),
    };
    Ok(command)
}
