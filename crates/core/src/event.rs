//! Inbound events delivered by the voice service, already decoded from
//! their binary frames.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Numeric event ids used on the voice-service connection.
pub mod codes {
    // Client -> server.
    pub const START_CONNECTION: u32 = 1;
    pub const FINISH_CONNECTION: u32 = 2;
    pub const START_SESSION: u32 = 100;
    pub const FINISH_SESSION: u32 = 102;
    pub const TASK_REQUEST: u32 = 200;
    pub const CHAT_TTS_TEXT: u32 = 500;

    // Server -> client.
    pub const SESSION_FINISHED: u32 = 152;
    pub const SESSION_FAILED: u32 = 153;
    pub const CLEAR_AUDIO: u32 = 450;
    pub const ASR_RESPONSE: u32 = 451;
    pub const CHAT_RESPONSE: u32 = 550;
    pub const CHAT_ENDED: u32 = 559;
}

/// The kind of server message a frame carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Ack,
    FullResponse,
    Error,
}

/// Body of an inbound frame after decompression and deserialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Binary(Bytes),
    Json(Value),
    Text(String),
}

/// One decoded server message. Consumed once by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: MessageKind,
    pub event: Option<u32>,
    pub error_code: Option<u32>,
    pub sequence: Option<i32>,
    pub session_id: Option<String>,
    pub payload: Payload,
}

#[derive(Deserialize)]
struct AsrPayload {
    #[serde(default)]
    results: Vec<AsrResult>,
}

#[derive(Deserialize)]
struct AsrResult {
    #[serde(default)]
    text: String,
    #[serde(default = "interim_by_default")]
    is_interim: bool,
}

fn interim_by_default() -> bool {
    true
}

#[derive(Deserialize)]
struct ChatPayload {
    #[serde(default)]
    content: String,
}

impl InboundEvent {
    /// A full server response carrying an event id and a JSON body.
    pub fn full_response(event: u32, payload: Value) -> Self {
        Self {
            kind: MessageKind::FullResponse,
            event: Some(event),
            error_code: None,
            sequence: None,
            session_id: None,
            payload: Payload::Json(payload),
        }
    }

    /// An acknowledgement carrying synthesized audio.
    pub fn audio_ack(audio: Bytes) -> Self {
        Self {
            kind: MessageKind::Ack,
            event: None,
            error_code: None,
            sequence: None,
            session_id: None,
            payload: Payload::Binary(audio),
        }
    }

    /// A server error frame.
    pub fn server_error(code: u32, message: &str) -> Self {
        Self {
            kind: MessageKind::Error,
            event: None,
            error_code: Some(code),
            sequence: None,
            session_id: None,
            payload: Payload::Text(message.to_string()),
        }
    }

    /// Binary audio attached to the event, if any.
    pub fn audio(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The first final, non-blank transcript in an ASR result list.
    ///
    /// Interim results and blank texts are skipped. Payloads that do not have
    /// the expected shape are logged and treated as carrying no transcript.
    pub fn final_transcript(&self) -> Option<String> {
        let Payload::Json(value) = &self.payload else {
            return None;
        };
        match AsrPayload::deserialize(value) {
            Ok(asr) => asr
                .results
                .into_iter()
                .find(|r| !r.is_interim && !r.text.trim().is_empty())
                .map(|r| r.text.trim().to_string()),
            Err(e) => {
                warn!(error = %e, "Could not extract ASR text from payload");
                None
            }
        }
    }

    /// Text relayed from the voice service's embedded model.
    pub fn relayed_content(&self) -> Option<String> {
        match &self.payload {
            Payload::Json(value) => match ChatPayload::deserialize(value) {
                Ok(chat) => Some(chat.content),
                Err(e) => {
                    warn!(error = %e, "Could not parse relayed model content");
                    None
                }
            },
            Payload::Text(text) => Some(text.clone()),
            _ => None,
        }
    }
}
