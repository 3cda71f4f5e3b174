//! Envelope codec: AES-256-GCM sealing of inner envelopes.
//!
//! An inner [`Envelope`] is serialized to JSON, sealed under the session key
//! with a random 96-bit nonce and empty AAD, and carried as the payload of
//! an outer `encrypted` envelope:
//!
//! `{ "type": "encrypted", "payload": { "iv": b64(nonce), "ciphertext": b64(ct || tag) } }`
//!
//! This is byte-compatible with WebCrypto `AES-GCM` (tag appended).

use crate::codec::{b64_decode, b64_encode};
use crate::error::{LuciaError, LuciaResult};
use crate::messages::{EncryptedPayload, Envelope, Message, MsgType};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// A negotiated AES-256-GCM session key. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> LuciaResult<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            LuciaError::Crypto(format!(
                "session key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(arr))
    }

    /// Random key, for tests and tooling that need a key without a handshake.
    pub fn generate() -> LuciaResult<Self> {
        let mut bytes = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| LuciaError::Crypto("RNG failure".into()))?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    fn aead_key(&self) -> LuciaResult<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.bytes[..])
            .map_err(|_| LuciaError::Crypto("invalid AES-256-GCM key".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Seal `plaintext` under a freshly generated nonce.
///
/// Returns `(nonce, ciphertext || tag)`.
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> LuciaResult<([u8; NONCE_LEN], Vec<u8>)> {
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| LuciaError::Crypto("RNG failure".into()))?;

    let mut in_out = plaintext.to_vec();
    key.aead_key()?
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
        .map_err(|_| LuciaError::Crypto("seal failed".into()))?;

    Ok((nonce, in_out))
}

/// Open `ciphertext || tag` sealed under `nonce`. Fails closed on any
/// tag mismatch.
pub fn open(key: &SessionKey, nonce: &[u8], ciphertext: &[u8]) -> LuciaResult<Vec<u8>> {
    let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| {
        LuciaError::Crypto(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        ))
    })?;
    if ciphertext.len() < TAG_LEN {
        return Err(LuciaError::Crypto("ciphertext shorter than tag".into()));
    }

    let mut in_out = ciphertext.to_vec();
    let plain_len = key
        .aead_key()?
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| LuciaError::Crypto("authentication tag mismatch".into()))?
        .len();
    in_out.truncate(plain_len);
    Ok(in_out)
}

/// Encrypt an inner envelope into an outer `encrypted` envelope.
pub fn encrypt_envelope(key: &SessionKey, message: &Envelope) -> LuciaResult<Envelope> {
    let plaintext = Zeroizing::new(serde_json::to_vec(message)?);
    let (nonce, ciphertext) = seal(key, &plaintext)?;

    Message::Encrypted(EncryptedPayload {
        iv: b64_encode(&nonce),
        ciphertext: b64_encode(&ciphertext),
    })
    .into_envelope()
}

/// Decrypt an outer `encrypted` envelope back into the inner envelope.
///
/// Bad base64, wrong nonce length and tag mismatch are [`LuciaError::Crypto`];
/// a wrong outer type, a missing field or undecodable inner JSON are
/// [`LuciaError::Protocol`].
pub fn decrypt_envelope(key: &SessionKey, envelope: &Envelope) -> LuciaResult<Envelope> {
    if envelope.kind() != Some(MsgType::Encrypted) {
        return Err(LuciaError::Protocol(format!(
            "expected encrypted envelope, got {}",
            envelope.msg_type
        )));
    }
    let payload: EncryptedPayload = serde_json::from_value(envelope.payload.clone())
        .map_err(|e| LuciaError::Protocol(format!("invalid encrypted payload: {e}")))?;

    let nonce = b64_decode(&payload.iv)
        .map_err(|e| LuciaError::Crypto(format!("invalid iv encoding: {e}")))?;
    let ciphertext = b64_decode(&payload.ciphertext)
        .map_err(|e| LuciaError::Crypto(format!("invalid ciphertext encoding: {e}")))?;

    let plaintext = Zeroizing::new(open(key, &nonce, &ciphertext)?);
    serde_json::from_slice(&plaintext)
        .map_err(|e| LuciaError::Protocol(format!("malformed inner envelope: {e}")))
}
