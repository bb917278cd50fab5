use super::state::AppState;
use crate::dialogflow::ConversationReply;
use crate::error::{AgentError, Result};
use crate::message::{normalize, JsonMessage, NormalizedMessage, RawPayload};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, FromRequest, Multipart, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Json},
    Form,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    /// Session to continue, supplied out of band
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyMessageQuery {
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FormMessage {
    message: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub response: String,
    pub session_id: String,
}

impl From<ConversationReply> for MessageResponse {
    fn from(reply: ConversationReply) -> Self {
        Self {
            response: reply.text,
            session_id: reply.session_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GreetingResponse {
    pub message: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /
pub async fn root() -> impl IntoResponse {
    Json(GreetingResponse {
        message: "Hello there",
    })
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// POST /ai-agent/message
/// Relay a text message, base64 audio, or uploaded audio file
pub async fn post_message(
    State(state): State<AppState>,
    query: std::result::Result<Query<SessionQuery>, QueryRejection>,
    request: Request,
) -> Result<Json<MessageResponse>> {
    let Query(query) = query.map_err(query_rejection).inspect_err(log_failure)?;
    let mut raw = decode_payload(request).await.inspect_err(log_failure)?;

    // The query parameter beats a multipart `session_id` field
    raw.query_session_id = query.session_id.or(raw.query_session_id);

    let message = normalize(raw).inspect_err(log_failure)?;
    relay(&state, message).await
}

/// POST /ai-agent/ai-agent-message?message=..&session_id=..
/// Legacy text-only route
pub async fn post_legacy_message(
    State(state): State<AppState>,
    query: std::result::Result<Query<LegacyMessageQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>> {
    let Query(query) = query.map_err(query_rejection).inspect_err(log_failure)?;
    let message =
        NormalizedMessage::new(query.message, None, query.session_id).inspect_err(log_failure)?;
    relay(&state, message).await
}

async fn relay(state: &AppState, message: NormalizedMessage) -> Result<Json<MessageResponse>> {
    info!(
        session_id = message.session_id(),
        has_text = !message.text().is_empty(),
        audio_bytes = message.audio().map(<[u8]>::len).unwrap_or(0),
        "Relaying message"
    );

    let client = state.client.get().await.inspect_err(log_failure)?;
    let reply = client
        .detect_intent(&message)
        .await
        .inspect_err(log_failure)?;

    Ok(Json(reply.into()))
}

fn query_rejection(rejection: QueryRejection) -> AgentError {
    AgentError::validation(format!("invalid query string: {}", rejection.body_text()))
}

fn log_failure(err: &AgentError) {
    match err {
        AgentError::Validation(_) => info!("Rejected request: {}", err),
        _ => error!("Request failed: {}", err),
    }
}

/// Decode whichever body shape the request carries into a `RawPayload`.
async fn decode_payload(request: Request) -> Result<RawPayload> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| AgentError::validation(e.body_text()))?;
        return read_multipart(multipart).await;
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(form) = Form::<FormMessage>::from_request(request, &())
            .await
            .map_err(|e| AgentError::validation(e.body_text()))?;
        return Ok(RawPayload {
            form_text: form.message,
            query_session_id: form.session_id,
            ..RawPayload::default()
        });
    }

    let body = Bytes::from_request(request, &())
        .await
        .map_err(|e| AgentError::validation(e.body_text()))?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RawPayload::default());
    }

    let json: JsonMessage = serde_json::from_slice(&body)
        .map_err(|e| AgentError::validation(format!("invalid JSON body: {}", e)))?;
    Ok(RawPayload::from_json(json))
}

async fn read_multipart(mut multipart: Multipart) -> Result<RawPayload> {
    let mut raw = RawPayload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AgentError::validation(format!("failed to read multipart: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio_file" => {
                let data = field.bytes().await.map_err(|e| {
                    AgentError::validation(format!("failed to read uploaded file: {}", e))
                })?;
                debug!(bytes = data.len(), "Received uploaded audio");
                raw.upload = Some(data.to_vec());
            }
            "message" => {
                raw.form_text = Some(field.text().await.map_err(|e| {
                    AgentError::validation(format!("failed to read message field: {}", e))
                })?);
            }
            "session_id" => {
                raw.query_session_id = Some(field.text().await.map_err(|e| {
                    AgentError::validation(format!("failed to read session_id field: {}", e))
                })?);
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    Ok(raw)
}
