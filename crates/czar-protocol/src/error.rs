//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the bytes were wrong, never that the
//! game refused the command. Game refusals are `GameError`s and travel
//! back to the client inside a [`CommandError`](crate::CommandError).

use crate::MessageKind;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame is not a `{type, data}` envelope at all.
    ///
    /// Connections that send these are dropped.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The envelope is fine but `data` does not match the shape of `kind`.
    #[error("malformed {kind:?} payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    /// The `type` integer names no message, or one the client may not send.
    #[error("unknown message type {0}")]
    UnknownType(i64),
}
