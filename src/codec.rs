// SPDX-License-Identifier: MIT

//! Frame codec: splits inbound device frames into `(message_id, payload)` and
//! encodes outbound frames the inverse way. The codec never interprets
//! payload contents; that is worker business.

use bytes::Bytes;

/// A decoded payload, preserving whether the device used the text or binary
/// wire representation (a reconnect may switch between them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

/// A decoded frame: the correlation id plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: u32,
    pub payload: Payload,
}

/// Decode a text frame of the form `"<digits>;<payload>"`.
///
/// Splits on the first `;`; anything before is parsed as the message id,
/// everything after (including further `;` characters) is the payload
/// verbatim. Returns `None` for a malformed frame (no `;`, or a
/// non-numeric id); callers log a warning and drop the frame rather than
/// terminate the connection.
pub fn decode_text(message: &str) -> Option<Frame> {
    let (id_part, payload) = message.split_once(';')?;
    let message_id: u32 = id_part.parse().ok()?;
    Some(Frame { message_id, payload: Payload::Text(payload.to_owned()) })
}

/// Decode a binary frame: first 4 bytes are a big-endian u32 message id,
/// the remainder is the payload. Returns `None` if shorter than 4 bytes.
pub fn decode_binary(message: &Bytes) -> Option<Frame> {
    if message.len() < 4 {
        return None;
    }
    let id_bytes: [u8; 4] = message[..4].try_into().ok()?;
    let message_id = u32::from_be_bytes(id_bytes);
    let payload = message.slice(4..);
    Some(Frame { message_id, payload: Payload::Binary(payload) })
}

/// Encode a text frame mirroring [`decode_text`].
pub fn encode_text(message_id: u32, payload: &str) -> String {
    format!("{message_id};{payload}")
}

/// Encode a binary frame mirroring [`decode_binary`].
pub fn encode_binary(message_id: u32, payload: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&message_id.to_be_bytes());
    out.extend_from_slice(payload);
    Bytes::from(out)
}

/// Encode a [`Payload`] under the given message id, mirroring whichever wire
/// representation it came in as (or was constructed with).
pub fn encode(message_id: u32, payload: &Payload) -> axum::extract::ws::Message {
    use axum::extract::ws::Message;
    match payload {
        Payload::Text(s) => Message::Text(encode_text(message_id, s).into()),
        Payload::Binary(b) => Message::Binary(encode_binary(message_id, b)),
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
