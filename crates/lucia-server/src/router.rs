//! Dispatch of decrypted application messages.

use crate::catalog;
use crate::responder::ResponseGenerator;
use crate::state::AppState;
use lucia_core::messages::{
    ChatMessagePayload, ChatResponsePayload, ModelsResponsePayload, PreferencesResponsePayload,
};
use lucia_core::{Envelope, LuciaResult, Message};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maps an inner message to its handler. Shared by every connection.
#[derive(Clone)]
pub struct Router {
    state: Arc<dyn AppState>,
    responder: Arc<dyn ResponseGenerator>,
}

impl Router {
    pub fn new(state: Arc<dyn AppState>, responder: Arc<dyn ResponseGenerator>) -> Self {
        Self { state, responder }
    }

    /// Decode an inner envelope and dispatch it.
    ///
    /// A payload that does not match its `type` is a protocol error; an
    /// unknown `type` is ignored.
    pub async fn route(&self, envelope: &Envelope) -> LuciaResult<Option<Envelope>> {
        let message = envelope.message()?;
        match self.dispatch(message).await? {
            Some(reply) => Ok(Some(reply.into_envelope()?)),
            None => Ok(None),
        }
    }

    /// Handle one typed message, returning the reply if its type has one.
    pub async fn dispatch(&self, message: Message) -> LuciaResult<Option<Message>> {
        match message {
            Message::ChatMessage(chat) => self.chat(chat).await.map(Some),

            Message::ModelsList => Ok(Some(Message::ModelsResponse(ModelsResponsePayload {
                models: catalog::models().to_vec(),
                current_model: self.state.current_model().await,
            }))),

            Message::PreferencesSet(p) => {
                debug!(key = %p.key, "preferences.set");
                let preferences = self.state.upsert_preference(p.key, p.value).await;
                Ok(Some(Message::PreferencesResponse(
                    PreferencesResponsePayload { preferences },
                )))
            }

            Message::PreferencesList => Ok(Some(Message::PreferencesResponse(
                PreferencesResponsePayload {
                    preferences: self.state.preferences().await,
                },
            ))),

            Message::ToolConfirmResponse(payload) => {
                info!(payload = %payload, "tool confirmation received");
                Ok(None)
            }

            // Server-originated or transport-level types carry no meaning
            // inside an encrypted envelope.
            Message::HandshakeInit(_)
            | Message::HandshakeResponse(_)
            | Message::HandshakeComplete(_)
            | Message::Encrypted(_)
            | Message::ChatResponse(_)
            | Message::ModelsResponse(_)
            | Message::PreferencesResponse(_) => {
                debug!(msg_type = %message.msg_type(), "ignoring message with no inbound handler");
                Ok(None)
            }

            Message::Unknown { msg_type, .. } => {
                debug!(msg_type = %msg_type, "ignoring unknown message type");
                Ok(None)
            }
        }
    }

    async fn chat(&self, chat: ChatMessagePayload) -> LuciaResult<Message> {
        // An empty model id leaves the current selection alone.
        if let Some(model) = chat.model.filter(|m| !m.is_empty()) {
            if !catalog::contains(&model) {
                warn!(model = %model, "selected model is not in the catalog");
            }
            self.state.set_current_model(model).await;
        }

        let content = self.responder.generate_reply(&chat.content).await?;
        Ok(Message::ChatResponse(ChatResponsePayload {
            content,
            model: self.state.current_model().await,
        }))
    }
}
