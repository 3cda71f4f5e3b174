//! ECDH P-256 key agreement.
//!
//! Handshake flow:
//! 1. Client sends `handshake.init` with its ephemeral P-256 public key
//! 2. Server generates its own ephemeral key, performs ECDH, and replies
//!    `handshake.response` with its public key and an attestation report
//! 3. Both sides use the 32-byte shared secret as the AES-256-GCM key
//! 4. Client sends `handshake.complete` inside the first encrypted envelope
//!
//! Public keys travel as base64 SubjectPublicKeyInfo DER, which is what
//! WebCrypto `exportKey("spki")` produces. Raw uncompressed SEC1 points are
//! accepted on input too.

use crate::codec::{b64_decode, b64_encode};
use crate::crypto::SessionKey;
use crate::error::{LuciaError, LuciaResult};
use crate::messages::{HandshakeInitPayload, HandshakeResponsePayload, Message};
use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, ECDH_P256};
use ring::rand::SystemRandom;
use std::fmt;

/// Length of an uncompressed SEC1 P-256 point (`0x04 || X || Y`).
pub const P256_POINT_LEN: usize = 65;

/// DER prefix of a P-256 SubjectPublicKeyInfo:
/// `SEQUENCE { SEQUENCE { id-ecPublicKey, prime256v1 }, BIT STRING (0 unused) }`.
const SPKI_P256_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

/// Wrap an uncompressed point in a SubjectPublicKeyInfo structure.
pub fn encode_spki(point: &[u8]) -> Vec<u8> {
    let mut spki = Vec::with_capacity(SPKI_P256_PREFIX.len() + point.len());
    spki.extend_from_slice(&SPKI_P256_PREFIX);
    spki.extend_from_slice(point);
    spki
}

/// Extract the uncompressed point from SPKI DER or a raw SEC1 encoding.
///
/// Only the encoding is checked here; whether the point lies on the curve
/// is checked by the agreement itself.
pub fn decode_public_key(bytes: &[u8]) -> LuciaResult<[u8; P256_POINT_LEN]> {
    let point = if bytes.len() == SPKI_P256_PREFIX.len() + P256_POINT_LEN {
        if bytes[..SPKI_P256_PREFIX.len()] != SPKI_P256_PREFIX {
            return Err(LuciaError::Protocol(
                "public key is not a P-256 SubjectPublicKeyInfo".into(),
            ));
        }
        &bytes[SPKI_P256_PREFIX.len()..]
    } else if bytes.len() == P256_POINT_LEN {
        bytes
    } else {
        return Err(LuciaError::Protocol(format!(
            "unexpected public key length: {}",
            bytes.len()
        )));
    };

    if point[0] != 0x04 {
        return Err(LuciaError::Protocol(
            "public key is not an uncompressed point".into(),
        ));
    }
    let mut out = [0u8; P256_POINT_LEN];
    out.copy_from_slice(point);
    Ok(out)
}

/// Decode a base64 public key as carried in handshake payloads.
pub fn decode_public_key_b64(encoded: &str) -> LuciaResult<[u8; P256_POINT_LEN]> {
    let bytes = b64_decode(encoded)
        .map_err(|e| LuciaError::Protocol(format!("public key is not base64: {e}")))?;
    decode_public_key(&bytes)
}

/// A single-use P-256 key pair. The private half is consumed by [`agree`].
///
/// [`agree`]: EphemeralKeyPair::agree
pub struct EphemeralKeyPair {
    private: EphemeralPrivateKey,
    public: [u8; P256_POINT_LEN],
}

impl EphemeralKeyPair {
    pub fn generate() -> LuciaResult<Self> {
        let rng = SystemRandom::new();
        let private = EphemeralPrivateKey::generate(&ECDH_P256, &rng)
            .map_err(|_| LuciaError::Crypto("P-256 key generation failed".into()))?;
        let computed = private
            .compute_public_key()
            .map_err(|_| LuciaError::Crypto("P-256 public key derivation failed".into()))?;

        let mut public = [0u8; P256_POINT_LEN];
        public.copy_from_slice(computed.as_ref());
        Ok(Self { private, public })
    }

    /// Raw uncompressed point.
    pub fn public_key(&self) -> &[u8; P256_POINT_LEN] {
        &self.public
    }

    /// Base64 SubjectPublicKeyInfo, as sent on the wire.
    pub fn public_key_b64(&self) -> String {
        b64_encode(&encode_spki(&self.public))
    }

    /// ECDH with the peer's point. The shared X coordinate is the session key.
    pub fn agree(self, peer_point: &[u8]) -> LuciaResult<SessionKey> {
        let peer = UnparsedPublicKey::new(&ECDH_P256, peer_point);
        agreement::agree_ephemeral(self.private, &peer, SessionKey::from_slice)
            .map_err(|_| LuciaError::Protocol("public key is not a valid P-256 point".into()))?
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Server half of a key agreement.
#[derive(Debug)]
pub struct Negotiated {
    /// Base64 SPKI of the server's ephemeral key.
    pub server_public_key: String,
    pub session_key: SessionKey,
}

/// Run the server side of the agreement against a client's base64 key.
///
/// A fresh key pair is generated on every call, so identical client input
/// never yields the same server key or session key twice.
pub fn negotiate(client_public_key: &str) -> LuciaResult<Negotiated> {
    let client_point = decode_public_key_b64(client_public_key)?;
    let keypair = EphemeralKeyPair::generate()?;
    let server_public_key = keypair.public_key_b64();
    let session_key = keypair.agree(&client_point)?;
    Ok(Negotiated {
        server_public_key,
        session_key,
    })
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct ClientHandshake {
    keypair: EphemeralKeyPair,
}

impl ClientHandshake {
    pub fn new() -> LuciaResult<Self> {
        Ok(Self {
            keypair: EphemeralKeyPair::generate()?,
        })
    }

    /// The `handshake.init` message carrying this client's public key.
    pub fn init_message(&self) -> Message {
        Message::HandshakeInit(HandshakeInitPayload {
            client_public_key: self.keypair.public_key_b64(),
        })
    }

    /// Derive the session key from the server's `handshake.response`.
    pub fn finish(self, response: &HandshakeResponsePayload) -> LuciaResult<SessionKey> {
        let server_point = decode_public_key_b64(&response.server_public_key)?;
        self.keypair.agree(&server_point)
    }
}
