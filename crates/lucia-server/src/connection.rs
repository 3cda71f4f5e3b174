//! Per-connection message loop.
//!
//! Frames are handled strictly in order: a message's handler, including
//! response generation, finishes and its reply is written before the next
//! frame is read. Failures are confined to the frame that caused them
//! unless the transport itself is gone.

use crate::handshake::HandshakeHandler;
use crate::router::Router;
use crate::session::Session;
use lucia_core::messages::HandshakeInitPayload;
use lucia_core::{
    decode_frame_bytes, decrypt_envelope, encode_frame, encrypt_envelope, Disposition, Envelope,
    FrameTransport, LuciaError, LuciaResult, Message, MsgType,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Hardening knobs from the `[session]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct SessionPolicy {
    /// Drop application messages until the client confirms the handshake.
    #[serde(default)]
    pub require_handshake_complete: bool,
    /// Close the connection after this many failed decryptions. 0 disables.
    #[serde(default)]
    pub max_decrypt_failures: u32,
}

/// Everything a connection needs that outlives it.
pub struct Services {
    pub handshake: HandshakeHandler,
    pub router: Router,
    pub policy: SessionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

pub struct Connection<T: FrameTransport> {
    transport: T,
    session: Session,
    services: Arc<Services>,
    shutdown: broadcast::Receiver<()>,
}

impl<T: FrameTransport> Connection<T> {
    pub fn new(
        connection_id: u64,
        transport: T,
        services: Arc<Services>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            transport,
            session: Session::new(connection_id),
            services,
            shutdown,
        }
    }

    /// Run until the peer disconnects, the transport fails, or the server
    /// shuts down. The session key is zeroized on return.
    pub async fn run(mut self) {
        let conn_id = self.session.connection_id();
        let peer = self.transport.peer();
        info!(conn_id, peer = %peer, "client connected");

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.recv() => {
                    debug!(conn_id, "shutdown signal received, closing connection");
                    break;
                }
                frame = self.transport.recv_frame() => frame,
            };

            let bytes = match frame {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(conn_id, "peer closed connection");
                    break;
                }
                Err(e) => {
                    debug!(conn_id, error = %e, "connection ended");
                    break;
                }
            };

            match self.handle_frame(&bytes).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(e) => match e.disposition() {
                    Disposition::DropMessage => {
                        warn!(conn_id, error = %e, "dropping message");
                    }
                    Disposition::CloseConnection => {
                        warn!(conn_id, error = %e, "closing connection");
                        break;
                    }
                },
            }
        }

        if let Err(e) = self.transport.close().await {
            debug!(conn_id, error = %e, "close failed");
        }
        let phase = self.session.phase();
        let decrypt_failures = self.session.decrypt_failures();
        self.session.close();
        info!(
            conn_id,
            peer = %peer,
            phase = ?phase,
            decrypt_failures,
            duration_ms = self.session.age().as_millis() as u64,
            "client disconnected"
        );
    }

    async fn handle_frame(&mut self, bytes: &[u8]) -> LuciaResult<Flow> {
        let envelope = decode_frame_bytes(bytes)?;

        match envelope.kind() {
            Some(MsgType::HandshakeInit) => match envelope.message()? {
                Message::HandshakeInit(init) => self.on_handshake_init(&init).await,
                _ => Ok(Flow::Continue),
            },
            Some(MsgType::Encrypted) => self.on_encrypted(&envelope).await,
            _ => {
                debug!(msg_type = %envelope.msg_type, "unhandled plaintext message");
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_handshake_init(&mut self, init: &HandshakeInitPayload) -> LuciaResult<Flow> {
        let outcome = self.services.handshake.initiate(init).await?;
        let rehandshake = self.session.key().is_some();

        // Install before replying so the client's first encrypted frame
        // always finds the key.
        self.session.install_key(outcome.session_key);
        self.send(&Envelope::new(&Message::HandshakeResponse(outcome.response))?)
            .await?;

        info!(
            conn_id = self.session.connection_id(),
            rehandshake,
            "handshake response sent"
        );
        Ok(Flow::Continue)
    }

    async fn on_encrypted(&mut self, envelope: &Envelope) -> LuciaResult<Flow> {
        let Some(key) = self.session.key().cloned() else {
            return Err(LuciaError::Protocol(
                "encrypted message before handshake".into(),
            ));
        };

        let inner = match decrypt_envelope(&key, envelope) {
            Ok(inner) => inner,
            Err(e) if e.is_crypto() => {
                let failures = self.session.record_decrypt_failure();
                let budget = self.services.policy.max_decrypt_failures;
                if budget > 0 && failures >= budget {
                    warn!(
                        conn_id = self.session.connection_id(),
                        failures,
                        error = %e,
                        "decryption failure budget exhausted"
                    );
                    return Ok(Flow::Close);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if inner.kind() == Some(MsgType::HandshakeComplete) {
            if let Message::HandshakeComplete(payload) = inner.message()? {
                if self.services.handshake.complete(&payload) {
                    self.session.confirm();
                }
            }
            return Ok(Flow::Continue);
        }

        if self.services.policy.require_handshake_complete && !self.session.is_confirmed() {
            debug!(msg_type = %inner.msg_type, "dropping message before handshake.complete");
            return Ok(Flow::Continue);
        }

        if let Some(reply) = self.services.router.route(&inner).await? {
            let sealed = encrypt_envelope(&key, &reply)?;
            self.send(&sealed).await?;
        }
        Ok(Flow::Continue)
    }

    async fn send(&mut self, envelope: &Envelope) -> LuciaResult<()> {
        let frame = encode_frame(envelope)?;
        self.transport.send_text(frame).await
    }
}
