//! Response generation.
//!
//! The router only depends on [`ResponseGenerator`]. [`MockResponder`]
//! returns canned replies for a few keywords and otherwise echoes the
//! message back after a simulated inference delay drawn from a
//! [`LatencyModel`].

use async_trait::async_trait;
use lucia_core::LuciaResult;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Turns a plaintext user message into a plaintext reply.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate_reply(&self, message: &str) -> LuciaResult<String>;
}

/// Simulated inference latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyModel {
    None,
    Fixed(Duration),
    /// Uniformly distributed in `[min, max]`.
    Uniform { min: Duration, max: Duration },
}

impl LatencyModel {
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        match (min_ms, max_ms) {
            (0, 0) => LatencyModel::None,
            (min, max) if min >= max => LatencyModel::Fixed(Duration::from_millis(min)),
            (min, max) => LatencyModel::Uniform {
                min: Duration::from_millis(min),
                max: Duration::from_millis(max),
            },
        }
    }

    pub fn sample(&self) -> Duration {
        match *self {
            LatencyModel::None => Duration::ZERO,
            LatencyModel::Fixed(d) => d,
            LatencyModel::Uniform { min, max } => {
                let ms = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
                Duration::from_millis(ms as u64)
            }
        }
    }
}

impl Default for LatencyModel {
    fn default() -> Self {
        LatencyModel::from_millis(300, 800)
    }
}

/// Keyword → reply, checked in order against the lowercased message.
const CANNED_REPLIES: [(&str, &str); 3] = [
    (
        "hello",
        "Hello! I'm Lucia, your privacy-preserving AI agent. All our communication is \
         end-to-end encrypted inside a Trusted Execution Environment. How can I help you today?",
    ),
    (
        "help",
        "I can help you with:\n- Answering questions\n- Managing your calendar and email \
         (coming in Phase 2)\n- Web searches and research (coming in Phase 2)\n- Running skills \
         from the marketplace (coming in Phase 3)\n\nAll processing happens inside a \
         hardware-encrypted enclave. Not even the platform operator can see your data.",
    ),
    ("ping", "Pong! E2E encryption verified."),
];

/// Canned/echo responder used in development.
#[derive(Debug, Clone, Default)]
pub struct MockResponder {
    latency: LatencyModel,
}

impl MockResponder {
    pub fn new(latency: LatencyModel) -> Self {
        Self { latency }
    }

    /// The canned reply for `message`, if any keyword matches.
    pub fn canned_reply(message: &str) -> Option<&'static str> {
        let lower = message.trim().to_lowercase();
        CANNED_REPLIES
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
            .map(|(_, reply)| *reply)
    }
}

#[async_trait]
impl ResponseGenerator for MockResponder {
    async fn generate_reply(&self, message: &str) -> LuciaResult<String> {
        if let Some(reply) = Self::canned_reply(message) {
            return Ok(reply.to_string());
        }

        let delay = self.latency.sample();
        debug!(delay_ms = delay.as_millis() as u64, "simulating inference latency");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(format!(
            "[Mock Agent] I received your message: \"{message}\"\n\n\
             This is a mock response from the dev environment. In production, this would be \
             processed by the LLM inference TEE via the Python inference bridge."
        ))
    }
}
