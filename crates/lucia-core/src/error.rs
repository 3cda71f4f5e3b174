use thiserror::Error;

/// Errors produced by the Lucia protocol layer.
#[derive(Debug, Error)]
pub enum LuciaError {
    /// Malformed envelope, undecodable public key, or a payload that does
    /// not match the shape its `type` promises.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// AEAD authentication failure or malformed nonce/ciphertext.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The attestation provider or response generator did not answer.
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the connection loop should do after a message failed to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log and drop the single message; the connection stays open.
    DropMessage,
    /// The socket itself is gone or unusable.
    CloseConnection,
}

impl LuciaError {
    /// How a failure while processing one inbound frame is handled.
    pub fn disposition(&self) -> Disposition {
        match self {
            LuciaError::Transport(_) | LuciaError::Io(_) => Disposition::CloseConnection,
            _ => Disposition::DropMessage,
        }
    }

    /// Whether this error is an AEAD/nonce failure.
    pub fn is_crypto(&self) -> bool {
        matches!(self, LuciaError::Crypto(_))
    }
}

pub type LuciaResult<T> = Result<T, LuciaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_level_errors_keep_connection_open() {
        assert_eq!(
            LuciaError::Protocol("bad".into()).disposition(),
            Disposition::DropMessage
        );
        assert_eq!(
            LuciaError::Crypto("tag".into()).disposition(),
            Disposition::DropMessage
        );
        assert_eq!(
            LuciaError::CollaboratorUnavailable("attest".into()).disposition(),
            Disposition::DropMessage
        );
    }

    #[test]
    fn transport_errors_close_connection() {
        assert_eq!(
            LuciaError::Transport("reset".into()).disposition(),
            Disposition::CloseConnection
        );
    }

    #[test]
    fn json_errors_convert() {
        let err: LuciaError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, LuciaError::Json(_)));
        assert!(!err.is_crypto());
    }
}
