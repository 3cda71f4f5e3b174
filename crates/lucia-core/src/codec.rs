//! JSON text framing for the Lucia socket.
//!
//! Wire format: one UTF-8 JSON [`Envelope`] per WebSocket frame. Binary
//! fields inside payloads (keys, nonces, ciphertext) are standard base64.

use crate::error::{LuciaError, LuciaResult};
use crate::messages::Envelope;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Maximum accepted frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Serialize an envelope into a text frame.
pub fn encode_frame(envelope: &Envelope) -> LuciaResult<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse a text frame into an envelope.
pub fn decode_frame(frame: &str) -> LuciaResult<Envelope> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(LuciaError::Protocol(format!(
            "frame too large: {} bytes (max {})",
            frame.len(),
            MAX_FRAME_SIZE
        )));
    }
    serde_json::from_str(frame)
        .map_err(|e| LuciaError::Protocol(format!("malformed envelope: {e}")))
}

/// Parse a frame that arrived as bytes (binary WebSocket message).
pub fn decode_frame_bytes(frame: &[u8]) -> LuciaResult<Envelope> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| LuciaError::Protocol(format!("frame is not UTF-8: {e}")))?;
    decode_frame(text)
}

/// Standard base64 with padding, as produced by `Buffer.toString('base64')`.
pub fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn b64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(input.trim())
}
