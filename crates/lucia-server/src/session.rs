//! Per-connection session state.

use lucia_core::SessionKey;
use std::time::{Duration, Instant};

/// Lifecycle phase of a connection's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHandshake,
    Established,
    Closed,
}

/// State owned by exactly one connection loop.
#[derive(Debug)]
pub struct Session {
    connection_id: u64,
    phase: Phase,
    key: Option<SessionKey>,
    /// Whether the client has sent `handshake.complete` with status "ok".
    confirmed: bool,
    decrypt_failures: u32,
    created_at: Instant,
}

impl Session {
    pub fn new(connection_id: u64) -> Self {
        Self {
            connection_id,
            phase: Phase::AwaitingHandshake,
            key: None,
            confirmed: false,
            decrypt_failures: 0,
            created_at: Instant::now(),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The negotiated key; `None` until a handshake succeeds.
    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// Install a freshly negotiated key. Replaces (and zeroizes) any key
    /// from an earlier handshake on this connection.
    pub fn install_key(&mut self, key: SessionKey) {
        if self.phase == Phase::Closed {
            return;
        }
        self.key = Some(key);
        self.phase = Phase::Established;
        self.confirmed = false;
        self.decrypt_failures = 0;
    }

    pub fn confirm(&mut self) {
        if self.phase == Phase::Established {
            self.confirmed = true;
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Count a failed decryption, returning the running total.
    pub fn record_decrypt_failure(&mut self) -> u32 {
        self.decrypt_failures = self.decrypt_failures.saturating_add(1);
        self.decrypt_failures
    }

    pub fn decrypt_failures(&self) -> u32 {
        self.decrypt_failures
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Drop the key and mark the session closed.
    pub fn close(&mut self) {
        self.key = None;
        self.confirmed = false;
        self.phase = Phase::Closed;
    }
}
