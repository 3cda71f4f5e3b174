//! lucia-core: Shared protocol library for the Lucia agent channel.
//!
//! Provides JSON envelope types, text framing, the ECDH P-256 handshake,
//! the AES-256-GCM envelope codec, key fingerprints, and the abstract
//! frame transport trait.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod messages;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{b64_decode, b64_encode, decode_frame, decode_frame_bytes, encode_frame};
pub use crypto::{decrypt_envelope, encrypt_envelope, SessionKey};
pub use error::{Disposition, LuciaError, LuciaResult};
pub use handshake::{negotiate, ClientHandshake, Negotiated};
pub use identity::{fingerprint, short_fingerprint};
pub use messages::{Envelope, Message, MsgType, PROTOCOL_VERSION};
pub use transport::FrameTransport;
