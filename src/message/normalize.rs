//! Collapse the inbound channels of one request into a single `NormalizedMessage`.
//!
//! Precedence for the primary content is an ordered rule table:
//! 1. JSON `audio_data` (base64), with any JSON `message` attached as text
//! 2. JSON `message`
//! 3. form `message`
//!
//! An uploaded file fills the audio slot only when rule 1 did not apply. The
//! JSON `session_id` beats the out-of-band one; with neither, a fresh id is minted.

use super::payload::RawPayload;
use crate::error::{AgentError, Result};
use base64::Engine;
use tracing::debug;
use uuid::Uuid;

/// Canonical message handed to the conversational backend.
///
/// Always carries non-empty text or audio, plus the session id the call will use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    text: String,
    audio: Option<Vec<u8>>,
    session_id: String,
}

impl NormalizedMessage {
    /// Build a message, minting a UUIDv4 session id when none (or an empty one) is given.
    pub fn new(text: String, audio: Option<Vec<u8>>, session_id: Option<String>) -> Result<Self> {
        let audio = audio.filter(|bytes| !bytes.is_empty());

        if text.is_empty() && audio.is_none() {
            return Err(AgentError::validation(
                "request must include a message or audio",
            ));
        }

        let session_id = non_empty(session_id).unwrap_or_else(new_session_id);

        Ok(Self {
            text,
            audio,
            session_id,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn audio(&self) -> Option<&[u8]> {
        self.audio.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Fresh random session identifier (122 random bits).
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Content picked by the first matching precedence rule
#[derive(Debug)]
struct Primary {
    text: String,
    audio: Option<Vec<u8>>,
}

type Rule = fn(&RawPayload) -> Result<Option<Primary>>;

const PRIMARY_RULES: [(&str, Rule); 3] = [
    ("json_audio", json_audio),
    ("json_text", json_text),
    ("form_text", form_text),
];

fn json_audio(raw: &RawPayload) -> Result<Option<Primary>> {
    let Some(json) = &raw.json else {
        return Ok(None);
    };
    let Some(encoded) = json.audio_data.as_deref().filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };

    let audio = decode_base64_audio(encoded)?;

    Ok(Some(Primary {
        text: json.message.clone().unwrap_or_default(),
        audio: Some(audio),
    }))
}

fn json_text(raw: &RawPayload) -> Result<Option<Primary>> {
    let text = raw.json.as_ref().and_then(|json| json.message.clone());
    Ok(non_empty(text).map(|text| Primary { text, audio: None }))
}

fn form_text(raw: &RawPayload) -> Result<Option<Primary>> {
    Ok(non_empty(raw.form_text.clone()).map(|text| Primary { text, audio: None }))
}

/// Apply the precedence table to one decoded request.
pub fn normalize(raw: RawPayload) -> Result<NormalizedMessage> {
    let mut primary = None;
    for (name, rule) in PRIMARY_RULES {
        if let Some(found) = rule(&raw)? {
            debug!(rule = name, "Selected primary message content");
            primary = Some(found);
            break;
        }
    }

    let upload = raw.upload.filter(|bytes| !bytes.is_empty());
    let (text, audio) = match primary {
        Some(Primary {
            text,
            audio: Some(audio),
        }) => (text, Some(audio)),
        Some(Primary { text, audio: None }) => (text, upload),
        None => (String::new(), upload),
    };

    let session_id = raw
        .json
        .and_then(|json| non_empty(json.session_id))
        .or_else(|| non_empty(raw.query_session_id));

    NormalizedMessage::new(text, audio, session_id)
}

/// Decode a base64 audio payload, tolerating a `data:<mime>;base64,` prefix.
fn decode_base64_audio(encoded: &str) -> Result<Vec<u8>> {
    let trimmed = encoded.trim();
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once("base64,")
            .map(|(_, data)| data)
            .ok_or_else(|| AgentError::validation("audio_data data URL is not base64"))?,
        None => trimmed,
    };

    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| AgentError::validation(format!("audio_data is not valid base64: {}", e)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
