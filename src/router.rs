//! Payload Routing
//!
//! Decides what a reconstructed payload is: a PSBT to co-sign, or a text
//! message to sign with an address key. Transactions are recognized by
//! the PSBT magic; everything else must be UTF-8, optionally wrapped in
//! a small JSON envelope that selects the address index.

use serde::Deserialize;
use thiserror::Error;

/// Leading bytes of every serialized PSBT.
pub const PSBT_MAGIC: [u8; 5] = *b"psbt\xff";

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Unrecognized payload")]
    Unrecognized,

    #[error("Invalid message request: {0}")]
    InvalidRequest(String),
}

pub type RouteResult<T> = Result<T, RouteError>;

/// A text message to sign, with the address index selecting the key.
#[derive(Debug, Clone, PartialEq)]
pub struct SignableMessage {
    pub message: String,
    pub address_index: u32,
}

/// What a received payload turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedPayload {
    /// Serialized PSBT bytes, magic included
    Transaction(Vec<u8>),
    Message(SignableMessage),
}

#[derive(Deserialize)]
struct MessageEnvelope {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    #[serde(default)]
    index: i64,
}

/// Classify a reconstructed payload.
pub fn route(payload: &[u8]) -> RouteResult<RoutedPayload> {
    if payload.starts_with(&PSBT_MAGIC) {
        return Ok(RoutedPayload::Transaction(payload.to_vec()));
    }
    let text = std::str::from_utf8(payload).map_err(|_| RouteError::Unrecognized)?;
    if let Ok(envelope) = serde_json::from_str::<MessageEnvelope>(text) {
        if envelope.kind == "sign_message" {
            if envelope.message.is_empty() {
                return Err(RouteError::InvalidRequest("Empty message".into()));
            }
            if envelope.index < 0 || envelope.index > i32::MAX as i64 {
                return Err(RouteError::InvalidRequest(format!(
                    "Address index {} out of range",
                    envelope.index
                )));
            }
            return Ok(RoutedPayload::Message(SignableMessage {
                message: envelope.message,
                address_index: envelope.index as u32,
            }));
        }
    }
    // Bare text signs with the first receive address.
    if text.trim().is_empty() {
        return Err(RouteError::Unrecognized);
    }
    Ok(RoutedPayload::Message(SignableMessage {
        message: text.to_string(),
        address_index: 0,
    }))
}
