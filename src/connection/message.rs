//! Connection message values
//!
//! A `Message` is what the application sees: a kind plus a byte payload.
//! Conversions to and from tungstenite frames live here so the pumps never
//! deal with the wire representation directly.

use std::borrow::Cow;

use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Errors raised when a value cannot be represented as a WebSocket frame
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Text payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Close payload must be empty or start with a 2-byte status code")]
    InvalidClosePayload,

    #[error("Raw frames are not supported")]
    UnsupportedFrame,
}

/// Opcode class of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl MessageKind {
    /// Data frames are the only kinds handed to the application loop
    pub fn is_data(self) -> bool {
        matches!(self, MessageKind::Text | MessageKind::Binary)
    }
}

/// An immutable message exchanged over a connection
///
/// Text payloads are guaranteed to be valid UTF-8. Close payloads are either
/// empty or a big-endian status code followed by a UTF-8 reason, which is the
/// layout used on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    payload: Vec<u8>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            payload: text.into().into_bytes(),
        }
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: MessageKind::Binary,
            payload: data.into(),
        }
    }

    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: MessageKind::Ping,
            payload: data.into(),
        }
    }

    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: MessageKind::Pong,
            payload: data.into(),
        }
    }

    /// Close message with a status code and reason
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self {
            kind: MessageKind::Close,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as text, if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }
}

impl TryFrom<WsMessage> for Message {
    type Error = MessageError;

    fn try_from(frame: WsMessage) -> Result<Self, Self::Error> {
        match frame {
            WsMessage::Text(text) => Ok(Message::text(text)),
            WsMessage::Binary(data) => Ok(Message::binary(data)),
            WsMessage::Ping(data) => Ok(Message::ping(data)),
            WsMessage::Pong(data) => Ok(Message::pong(data)),
            WsMessage::Close(None) => Ok(Self {
                kind: MessageKind::Close,
                payload: Vec::new(),
            }),
            WsMessage::Close(Some(frame)) => Ok(Message::close(frame.code.into(), &frame.reason)),
            WsMessage::Frame(_) => Err(MessageError::UnsupportedFrame),
        }
    }
}

impl TryFrom<Message> for WsMessage {
    type Error = MessageError;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        let Message { kind, payload } = message;
        match kind {
            MessageKind::Text => String::from_utf8(payload)
                .map(WsMessage::Text)
                .map_err(|_| MessageError::InvalidUtf8),
            MessageKind::Binary => Ok(WsMessage::Binary(payload)),
            MessageKind::Ping => Ok(WsMessage::Ping(payload)),
            MessageKind::Pong => Ok(WsMessage::Pong(payload)),
            MessageKind::Close => {
                if payload.is_empty() {
                    return Ok(WsMessage::Close(None));
                }
                if payload.len() < 2 {
                    return Err(MessageError::InvalidClosePayload);
                }
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = String::from_utf8(payload[2..].to_vec())
                    .map_err(|_| MessageError::InvalidUtf8)?;
                Ok(WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: Cow::Owned(reason),
                })))
            }
        }
    }
}
