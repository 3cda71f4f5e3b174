//! Abstract frame transport for the Lucia connection loop.
//!
//! The WebSocket listener and the in-memory test transport both satisfy
//! this trait, so the connection loop never touches a socket type directly.

use crate::error::LuciaResult;

/// A message-oriented, bidirectional text transport.
#[allow(async_fn_in_trait)]
pub trait FrameTransport: Send {
    /// Send one text frame.
    async fn send_text(&mut self, frame: String) -> LuciaResult<()>;

    /// Receive the next frame. `Ok(None)` means the peer closed cleanly.
    ///
    /// Frames that arrive as bytes are handed back as-is; the caller decides
    /// whether they are valid UTF-8.
    async fn recv_frame(&mut self) -> LuciaResult<Option<Vec<u8>>>;

    /// Close the transport.
    async fn close(&mut self) -> LuciaResult<()>;

    /// Human-readable peer identifier for logs.
    fn peer(&self) -> String;
}
