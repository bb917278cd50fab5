use super::auth::TokenProvider;
use super::messages::{
    ApiErrorBody, AudioInput, DetectIntentRequest, DetectIntentResponse, InputAudioConfig,
    QueryInput, QueryVariant, TextInput,
};
use crate::audio::{self, AudioTranscoder};
use crate::config::DialogflowConfig;
use crate::error::{AgentError, Result};
use crate::message::NormalizedMessage;
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, info};

/// Transport for the backend's single detect-intent RPC
#[async_trait]
pub trait SessionsApi: Send + Sync {
    async fn detect_intent(
        &self,
        session_path: &str,
        request: &DetectIntentRequest,
    ) -> Result<DetectIntentResponse>;
}

/// Dialogflow CX v3 REST transport
pub struct RestSessionsApi {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
}

impl RestSessionsApi {
    pub fn new(http: reqwest::Client, endpoint: String, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            endpoint,
            tokens,
        }
    }
}

#[async_trait]
impl SessionsApi for RestSessionsApi {
    async fn detect_intent(
        &self,
        session_path: &str,
        request: &DetectIntentRequest,
    ) -> Result<DetectIntentResponse> {
        let token = self.tokens.token().await?;
        let url = format!("{}/v3/{}:detectIntent", self.endpoint, session_path);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::backend(format!("detectIntent timed out: {}", e))
                } else {
                    AgentError::backend(format!("detectIntent request failed: {}", e))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| match b.error.status {
                    Some(code) => format!("{} ({})", b.error.message, code),
                    None => b.error.message,
                })
                .unwrap_or(body);
            return Err(AgentError::backend(format!(
                "detectIntent returned {}: {}",
                status, detail
            )));
        }

        resp.json::<DetectIntentResponse>()
            .await
            .map_err(|e| AgentError::backend(format!("invalid detectIntent response: {}", e)))
    }
}

/// Reply to one conversational turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationReply {
    pub text: String,
    /// The session id the call actually used
    pub session_id: String,
}

/// Builds backend requests for normalized messages and extracts replies.
///
/// One instance is shared by all requests (see `SharedConversationClient`).
pub struct ConversationClient {
    sessions: Arc<dyn SessionsApi>,
    project_id: String,
    location: String,
    agent_id: String,
    language_code: String,
    transcoder: AudioTranscoder,
}

impl ConversationClient {
    pub fn new(
        sessions: Arc<dyn SessionsApi>,
        config: &DialogflowConfig,
        transcoder: AudioTranscoder,
    ) -> Self {
        Self {
            sessions,
            project_id: config.project_id.clone(),
            location: config.location.clone(),
            agent_id: config.agent_id.clone(),
            language_code: config.language_code.clone(),
            transcoder,
        }
    }

    pub fn session_path(&self, session_id: &str) -> String {
        format!(
            "projects/{}/locations/{}/agents/{}/sessions/{}",
            self.project_id, self.location, self.agent_id, session_id
        )
    }

    /// Audio wins over text when both are present.
    pub async fn build_query_input(&self, message: &NormalizedMessage) -> Result<QueryInput> {
        let input = match message.audio() {
            Some(bytes) => {
                let prepared = audio::prepare(bytes, &self.transcoder).await?;
                QueryVariant::Audio(AudioInput {
                    config: InputAudioConfig {
                        audio_encoding: prepared.spec.encoding,
                        sample_rate_hertz: prepared.spec.sample_rate_hz,
                    },
                    audio: base64::engine::general_purpose::STANDARD.encode(&prepared.bytes),
                })
            }
            None => QueryVariant::Text(TextInput {
                text: message.text().to_string(),
            }),
        };

        Ok(QueryInput {
            input,
            language_code: self.language_code.clone(),
        })
    }

    pub async fn detect_intent(&self, message: &NormalizedMessage) -> Result<ConversationReply> {
        let session_id = message.session_id();
        let session_path = self.session_path(session_id);
        let request = DetectIntentRequest {
            query_input: self.build_query_input(message).await?,
        };

        let kind = match request.query_input.input {
            QueryVariant::Audio(_) => "audio",
            QueryVariant::Text(_) => "text",
        };
        info!("Sending {} query for session {}", kind, session_id);

        let response = self.sessions.detect_intent(&session_path, &request).await?;
        if let Some(transcript) = &response.query_result.transcript {
            debug!(session_id, transcript = %transcript, "Backend transcribed audio query");
        }

        let text = extract_reply_text(&response)?;
        debug!(
            response_id = response.response_id.as_deref().unwrap_or("-"),
            reply_chars = text.chars().count(),
            "Received backend reply"
        );

        Ok(ConversationReply {
            text,
            session_id: session_id.to_string(),
        })
    }
}

/// First text segment of the first response message.
///
/// No response messages at all is a successful, empty reply.
pub fn extract_reply_text(response: &DetectIntentResponse) -> Result<String> {
    let Some(first) = response.query_result.response_messages.first() else {
        return Ok(String::new());
    };

    first
        .text
        .as_ref()
        .and_then(|t| t.text.first())
        .cloned()
        .ok_or_else(|| AgentError::backend("first response message carries no text"))
}
