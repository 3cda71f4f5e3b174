//! Public-key fingerprints for logs.
//!
//! fingerprint = SHA-256(encoded public key), hex. Session keys are never
//! fingerprinted or logged.

use sha2::{Digest, Sha256};

/// Full hex-encoded SHA-256 fingerprint of an encoded public key.
pub fn fingerprint(public_key: &[u8]) -> String {
    let hash = Sha256::digest(public_key);
    hex::encode(hash)
}

/// First 16 hex chars of the fingerprint; enough to correlate log lines.
pub fn short_fingerprint(public_key: &[u8]) -> String {
    let mut fp = fingerprint(public_key);
    fp.truncate(16);
    fp
}

/// Fingerprint a base64 key as it appears in a handshake payload. Keys
/// that are not valid base64 are fingerprinted as raw text.
pub fn fingerprint_b64(encoded: &str) -> String {
    match crate::codec::b64_decode(encoded) {
        Ok(bytes) => short_fingerprint(&bytes),
        Err(_) => short_fingerprint(encoded.as_bytes()),
    }
}
