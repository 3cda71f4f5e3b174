//! Server side of the key-agreement handshake.
//!
//! 1. Client sends `handshake.init` with its P-256 public key
//! 2. Server negotiates a session key and fetches an attestation report
//! 3. Server sends `handshake.response` (public key, protocol version, report)
//! 4. Client later sends `handshake.complete` inside an encrypted envelope;
//!    that message is only logged here
//!
//! The session key is usable as soon as step 2 succeeds.

use crate::attestation::AttestationProvider;
use lucia_core::identity::fingerprint_b64;
use lucia_core::messages::{
    HandshakeCompletePayload, HandshakeInitPayload, HandshakeResponsePayload,
};
use lucia_core::{negotiate, LuciaError, LuciaResult, SessionKey, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a successful `handshake.init`.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Payload for the `handshake.response` envelope.
    pub response: HandshakeResponsePayload,
    /// Stays in the session; never sent.
    pub session_key: SessionKey,
}

pub struct HandshakeHandler {
    attestation: Arc<dyn AttestationProvider>,
    attestation_timeout: Duration,
}

impl HandshakeHandler {
    pub fn new(attestation: Arc<dyn AttestationProvider>, attestation_timeout: Duration) -> Self {
        Self {
            attestation,
            attestation_timeout,
        }
    }

    /// Process `handshake.init`.
    ///
    /// A malformed client key fails with [`LuciaError::Protocol`] before the
    /// attestation provider is contacted. If the provider fails or does not
    /// answer within the timeout, the negotiated key is discarded and the
    /// handshake fails with [`LuciaError::CollaboratorUnavailable`].
    pub async fn initiate(&self, init: &HandshakeInitPayload) -> LuciaResult<HandshakeOutcome> {
        let client_fp = fingerprint_b64(&init.client_public_key);
        debug!(client_key = %client_fp, "received handshake.init");

        let negotiated = negotiate(&init.client_public_key)?;

        let attestation =
            match tokio::time::timeout(self.attestation_timeout, self.attestation.fetch_report())
                .await
            {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    warn!(error = %e, "attestation provider failed");
                    return Err(e);
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.attestation_timeout.as_millis() as u64,
                        "attestation provider timed out"
                    );
                    return Err(LuciaError::CollaboratorUnavailable(
                        "attestation provider timed out".into(),
                    ));
                }
            };

        info!(
            client_key = %client_fp,
            server_key = %fingerprint_b64(&negotiated.server_public_key),
            "session key negotiated"
        );

        Ok(HandshakeOutcome {
            response: HandshakeResponsePayload {
                server_public_key: negotiated.server_public_key,
                protocol_version: PROTOCOL_VERSION.to_string(),
                attestation,
            },
            session_key: negotiated.session_key,
        })
    }

    /// Process `handshake.complete`. Returns whether the client reported "ok".
    pub fn complete(&self, payload: &HandshakeCompletePayload) -> bool {
        if payload.is_ok() {
            info!("handshake complete, E2E channel established");
            true
        } else {
            warn!(status = %payload.status, "handshake.complete with non-ok status");
            false
        }
    }
}
