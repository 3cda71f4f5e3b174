//! Lucia wire messages.
//!
//! Every frame is one JSON [`Envelope`] `{id, type, timestamp, payload}`.
//! [`Message`] is the typed view of an envelope: one variant per known
//! `type` tag, plus [`Message::Unknown`] so unrecognised tags survive
//! decoding and can be ignored by the router.

use crate::error::{LuciaError, LuciaResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Protocol version advertised in `handshake.response`.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Known message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    HandshakeInit,
    HandshakeResponse,
    HandshakeComplete,
    Encrypted,
    ChatMessage,
    ChatResponse,
    ModelsList,
    ModelsResponse,
    ToolConfirmResponse,
    PreferencesSet,
    PreferencesList,
    PreferencesResponse,
}

impl MsgType {
    pub const fn as_str(self) -> &'static str {
        match self {
            MsgType::HandshakeInit => "handshake.init",
            MsgType::HandshakeResponse => "handshake.response",
            MsgType::HandshakeComplete => "handshake.complete",
            MsgType::Encrypted => "encrypted",
            MsgType::ChatMessage => "chat.message",
            MsgType::ChatResponse => "chat.response",
            MsgType::ModelsList => "models.list",
            MsgType::ModelsResponse => "models.response",
            MsgType::ToolConfirmResponse => "tool.confirm.response",
            MsgType::PreferencesSet => "preferences.set",
            MsgType::PreferencesList => "preferences.list",
            MsgType::PreferencesResponse => "preferences.response",
        }
    }

    /// Map a wire tag to a known type. Unknown tags return `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        let ty = match tag {
            "handshake.init" => MsgType::HandshakeInit,
            "handshake.response" => MsgType::HandshakeResponse,
            "handshake.complete" => MsgType::HandshakeComplete,
            "encrypted" => MsgType::Encrypted,
            "chat.message" => MsgType::ChatMessage,
            "chat.response" => MsgType::ChatResponse,
            "models.list" => MsgType::ModelsList,
            "models.response" => MsgType::ModelsResponse,
            "tool.confirm.response" => MsgType::ToolConfirmResponse,
            "preferences.set" => MsgType::PreferencesSet,
            "preferences.list" => MsgType::PreferencesList,
            "preferences.response" => MsgType::PreferencesResponse,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Envelope ──────────────────────────────────────────────────────────

/// The outer wrapper carried by every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Wrap a typed message with a fresh id and the current timestamp.
    pub fn new(message: &Message) -> LuciaResult<Self> {
        Ok(Self {
            id: new_message_id(),
            msg_type: message.msg_type().to_string(),
            timestamp: now_millis(),
            payload: message.to_payload()?,
        })
    }

    /// The known type of this envelope, if any.
    pub fn kind(&self) -> Option<MsgType> {
        MsgType::parse(&self.msg_type)
    }

    /// Decode the payload according to the `type` tag.
    pub fn message(&self) -> LuciaResult<Message> {
        let Some(kind) = self.kind() else {
            return Ok(Message::Unknown {
                msg_type: self.msg_type.clone(),
                payload: self.payload.clone(),
            });
        };

        let msg = match kind {
            MsgType::HandshakeInit => Message::HandshakeInit(self.decode_payload(kind)?),
            MsgType::HandshakeResponse => Message::HandshakeResponse(self.decode_payload(kind)?),
            MsgType::HandshakeComplete => Message::HandshakeComplete(self.decode_payload(kind)?),
            MsgType::Encrypted => Message::Encrypted(self.decode_payload(kind)?),
            MsgType::ChatMessage => Message::ChatMessage(self.decode_payload(kind)?),
            MsgType::ChatResponse => Message::ChatResponse(self.decode_payload(kind)?),
            MsgType::ModelsList => Message::ModelsList,
            MsgType::ModelsResponse => Message::ModelsResponse(self.decode_payload(kind)?),
            MsgType::ToolConfirmResponse => Message::ToolConfirmResponse(self.payload.clone()),
            MsgType::PreferencesSet => Message::PreferencesSet(self.decode_payload(kind)?),
            MsgType::PreferencesList => Message::PreferencesList,
            MsgType::PreferencesResponse => {
                Message::PreferencesResponse(self.decode_payload(kind)?)
            }
        };
        Ok(msg)
    }

    fn decode_payload<T: DeserializeOwned>(&self, kind: MsgType) -> LuciaResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| LuciaError::Protocol(format!("invalid {kind} payload: {e}")))
    }
}

/// Generate a random envelope id.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Typed messages ────────────────────────────────────────────────────

/// Typed view of an envelope's payload, one variant per `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    HandshakeInit(HandshakeInitPayload),
    HandshakeResponse(HandshakeResponsePayload),
    HandshakeComplete(HandshakeCompletePayload),
    Encrypted(EncryptedPayload),
    ChatMessage(ChatMessagePayload),
    ChatResponse(ChatResponsePayload),
    ModelsList,
    ModelsResponse(ModelsResponsePayload),
    /// Payload is opaque to the server; it is only logged.
    ToolConfirmResponse(Value),
    PreferencesSet(PreferencesSetPayload),
    PreferencesList,
    PreferencesResponse(PreferencesResponsePayload),
    /// A tag this build does not know about.
    Unknown { msg_type: String, payload: Value },
}

impl Message {
    /// The wire tag for this message.
    pub fn msg_type(&self) -> &str {
        match self {
            Message::HandshakeInit(_) => MsgType::HandshakeInit.as_str(),
            Message::HandshakeResponse(_) => MsgType::HandshakeResponse.as_str(),
            Message::HandshakeComplete(_) => MsgType::HandshakeComplete.as_str(),
            Message::Encrypted(_) => MsgType::Encrypted.as_str(),
            Message::ChatMessage(_) => MsgType::ChatMessage.as_str(),
            Message::ChatResponse(_) => MsgType::ChatResponse.as_str(),
            Message::ModelsList => MsgType::ModelsList.as_str(),
            Message::ModelsResponse(_) => MsgType::ModelsResponse.as_str(),
            Message::ToolConfirmResponse(_) => MsgType::ToolConfirmResponse.as_str(),
            Message::PreferencesSet(_) => MsgType::PreferencesSet.as_str(),
            Message::PreferencesList => MsgType::PreferencesList.as_str(),
            Message::PreferencesResponse(_) => MsgType::PreferencesResponse.as_str(),
            Message::Unknown { msg_type, .. } => msg_type.as_str(),
        }
    }

    /// Serialize the payload half of the envelope.
    pub fn to_payload(&self) -> LuciaResult<Value> {
        let value = match self {
            Message::HandshakeInit(p) => serde_json::to_value(p)?,
            Message::HandshakeResponse(p) => serde_json::to_value(p)?,
            Message::HandshakeComplete(p) => serde_json::to_value(p)?,
            Message::Encrypted(p) => serde_json::to_value(p)?,
            Message::ChatMessage(p) => serde_json::to_value(p)?,
            Message::ChatResponse(p) => serde_json::to_value(p)?,
            Message::ModelsList | Message::PreferencesList => Value::Object(Default::default()),
            Message::ModelsResponse(p) => serde_json::to_value(p)?,
            Message::ToolConfirmResponse(v) => v.clone(),
            Message::PreferencesSet(p) => serde_json::to_value(p)?,
            Message::PreferencesResponse(p) => serde_json::to_value(p)?,
            Message::Unknown { payload, .. } => payload.clone(),
        };
        Ok(value)
    }

    /// Wrap in an envelope with a fresh id and timestamp.
    pub fn into_envelope(self) -> LuciaResult<Envelope> {
        Envelope::new(&self)
    }
}

// ── Payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInitPayload {
    /// Base64 SubjectPublicKeyInfo (or raw SEC1 point) of the client's P-256 key.
    pub client_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponsePayload {
    /// Base64 SubjectPublicKeyInfo of the server's ephemeral P-256 key.
    pub server_public_key: String,
    pub protocol_version: String,
    pub attestation: AttestationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeCompletePayload {
    pub status: String,
}

impl HandshakeCompletePayload {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// AES-GCM sealed inner envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 96-bit nonce.
    pub iv: String,
    /// Base64 ciphertext with the 16-byte tag appended.
    pub ciphertext: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponsePayload {
    pub content: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub context_length: u32,
    /// USD per million input tokens.
    pub input_price: f64,
    /// USD per million output tokens.
    pub output_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponsePayload {
    pub models: Vec<ModelInfo>,
    pub current_model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesSetPayload {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreferencesResponsePayload {
    pub preferences: BTreeMap<String, String>,
}

// ── Attestation ───────────────────────────────────────────────────────

/// Attestation report as produced by the attestation provider. The server
/// passes it through without interpreting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReport {
    pub tdx: TdxReport,
    pub generated_at: i64,
    pub image_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdxReport {
    pub quote: String,
    pub measurements: Measurements,
    #[serde(default)]
    pub collateral: Option<Value>,
}

/// TDX measurement registers, hex-encoded 48-byte digests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub mrtd: String,
    pub rtmr0: String,
    pub rtmr1: String,
    pub rtmr2: String,
    pub rtmr3: String,
}

impl Measurements {
    /// `(name, digest)` pairs in register order.
    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("mrtd", &self.mrtd),
            ("rtmr0", &self.rtmr0),
            ("rtmr1", &self.rtmr1),
            ("rtmr2", &self.rtmr2),
            ("rtmr3", &self.rtmr3),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn msg_type_tags_round_trip() {
        for ty in [
            MsgType::HandshakeInit,
            MsgType::HandshakeResponse,
            MsgType::HandshakeComplete,
            MsgType::Encrypted,
            MsgType::ChatMessage,
            MsgType::ChatResponse,
            MsgType::ModelsList,
            MsgType::ModelsResponse,
            MsgType::ToolConfirmResponse,
            MsgType::PreferencesSet,
            MsgType::PreferencesList,
            MsgType::PreferencesResponse,
        ] {
            assert_eq!(MsgType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(MsgType::parse("nope"), None);
    }

    #[test]
    fn envelope_wire_shape() {
        let env = Message::ChatMessage(ChatMessagePayload {
            content: "hi".into(),
            model: None,
        })
        .into_envelope()
        .unwrap();

        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "chat.message");
        assert_eq!(value["payload"], json!({ "content": "hi" }));
        assert!(value["id"].as_str().unwrap().len() >= 32);
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn decode_camel_case_handshake() {
        let env: Envelope = serde_json::from_value(json!({
            "id": "1",
            "type": "handshake.init",
            "timestamp": 0,
            "payload": { "clientPublicKey": "AAAA" }
        }))
        .unwrap();

        match env.message().unwrap() {
            Message::HandshakeInit(p) => assert_eq!(p.client_public_key, "AAAA"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let env: Envelope = serde_json::from_value(json!({
            "id": "1",
            "type": "calendar.sync",
            "timestamp": 0,
            "payload": { "x": 1 }
        }))
        .unwrap();

        match env.message().unwrap() {
            Message::Unknown { msg_type, payload } => {
                assert_eq!(msg_type, "calendar.sync");
                assert_eq!(payload, json!({ "x": 1 }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn shape_mismatch_is_protocol_error() {
        let env: Envelope = serde_json::from_value(json!({
            "id": "1",
            "type": "preferences.set",
            "timestamp": 0,
            "payload": { "key": "theme" }
        }))
        .unwrap();

        assert!(matches!(env.message(), Err(LuciaError::Protocol(_))));
    }

    #[test]
    fn missing_payload_defaults_for_list_requests() {
        let env: Envelope = serde_json::from_value(json!({
            "id": "1",
            "type": "models.list",
            "timestamp": 0
        }))
        .unwrap();

        assert_eq!(env.message().unwrap(), Message::ModelsList);
    }

    #[test]
    fn models_response_uses_camel_case() {
        let payload = ModelsResponsePayload {
            models: vec![ModelInfo {
                id: "a/b".into(),
                name: "B".into(),
                provider: "a".into(),
                context_length: 1024,
                input_price: 0.1,
                output_price: 0.2,
            }],
            current_model: "a/b".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["currentModel"], "a/b");
        assert_eq!(value["models"][0]["contextLength"], 1024);
        assert_eq!(value["models"][0]["inputPrice"], 0.1);
    }
}
