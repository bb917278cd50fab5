// ConversationClient request building, reply extraction, shared handle

mod common;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use common::MockSessions;
use dialog_relay::audio::AudioEncoding;
use dialog_relay::dialogflow::messages::{ResponseMessage, ResponseText};
use dialog_relay::dialogflow::{
    extract_reply_text, ClientConnector, ConversationClient, DetectIntentRequest,
    DetectIntentResponse, QueryVariant, SharedConversationClient,
};
use dialog_relay::{AgentError, NormalizedMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn text_message(text: &str, session_id: Option<&str>) -> NormalizedMessage {
    NormalizedMessage::new(text.to_string(), None, session_id.map(str::to_string)).unwrap()
}

#[tokio::test]
async fn test_text_query_round_trip() -> Result<()> {
    let sessions = MockSessions::replying(&["Hello!", "second segment"]);
    let client = common::client_with(sessions.clone());

    let reply = client
        .detect_intent(&text_message("Hi there", Some("session-42")))
        .await?;

    assert_eq!(reply.text, "Hello!");
    assert_eq!(reply.session_id, "session-42");

    let calls = sessions.recorded();
    assert_eq!(calls.len(), 1);
    let (path, request) = &calls[0];
    assert_eq!(
        path,
        "projects/test-project/locations/us-central1/agents/agent-1/sessions/session-42"
    );
    assert_eq!(request.query_input.language_code, "ar");
    match &request.query_input.input {
        QueryVariant::Text(input) => assert_eq!(input.text, "Hi there"),
        other => panic!("expected text query, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_generated_sessions_are_returned_and_unique() -> Result<()> {
    let client = common::client_with(MockSessions::replying(&["ok"]));

    let first = client.detect_intent(&text_message("a", None)).await?;
    let second = client.detect_intent(&text_message("b", None)).await?;

    assert!(!first.session_id.is_empty());
    assert!(!second.session_id.is_empty());
    assert_ne!(first.session_id, second.session_id);
    Ok(())
}

#[tokio::test]
async fn test_audio_takes_precedence_over_text() -> Result<()> {
    let sessions = MockSessions::replying(&["heard you"]);
    let client = common::client_with(sessions.clone());
    let wav = common::wav_bytes(16000, &[10, -10, 20, -20]);

    let message = NormalizedMessage::new("hi".to_string(), Some(wav.clone()), None)?;
    let reply = client.detect_intent(&message).await?;
    assert_eq!(reply.text, "heard you");

    let calls = sessions.recorded();
    match &calls[0].1.query_input.input {
        QueryVariant::Audio(input) => {
            assert_eq!(input.config.audio_encoding, AudioEncoding::Linear16);
            assert_eq!(input.config.sample_rate_hertz, 16000);
            let decoded = base64::engine::general_purpose::STANDARD.decode(&input.audio)?;
            assert_eq!(decoded, wav);
        }
        other => panic!("expected audio query, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_wav_header_rate_is_forwarded() -> Result<()> {
    let sessions = MockSessions::replying(&["ok"]);
    let client = common::client_with(sessions.clone());
    let wav = common::wav_bytes(8000, &[0; 80]);

    client
        .detect_intent(&NormalizedMessage::new(String::new(), Some(wav), None)?)
        .await?;

    let QueryVariant::Audio(input) = &sessions.recorded()[0].1.query_input.input else {
        panic!("expected audio query");
    };
    assert_eq!(input.config.sample_rate_hertz, 8000);
    Ok(())
}

#[tokio::test]
async fn test_zero_response_messages_is_empty_reply() -> Result<()> {
    let client = common::client_with(MockSessions::with_response(DetectIntentResponse::default()));
    let reply = client.detect_intent(&text_message("hi", Some("s"))).await?;
    assert_eq!(reply.text, "");
    assert_eq!(reply.session_id, "s");
    Ok(())
}

#[tokio::test]
async fn test_backend_failure_propagates() {
    let client = common::client_with(MockSessions::failing("quota exceeded"));
    let err = client
        .detect_intent(&text_message("hi", None))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Backend(ref m) if m.contains("quota exceeded")));
}

#[test]
fn test_reply_without_text_segments_is_backend_error() {
    let mut response = DetectIntentResponse::default();
    response
        .query_result
        .response_messages
        .push(ResponseMessage { text: None });
    assert!(matches!(
        extract_reply_text(&response),
        Err(AgentError::Backend(_))
    ));

    response.query_result.response_messages[0].text = Some(ResponseText { text: vec![] });
    assert!(extract_reply_text(&response).is_err());
}

#[test]
fn test_response_parsing_from_backend_json() -> Result<()> {
    let json = r#"{
        "responseId": "abc",
        "queryResult": {
            "languageCode": "ar",
            "transcript": "مرحبا",
            "responseMessages": [
                {"text": {"text": ["أهلا وسهلا"]}},
                {"payload": {"custom": true}}
            ]
        }
    }"#;
    let response: DetectIntentResponse = serde_json::from_str(json)?;
    assert_eq!(extract_reply_text(&response)?, "أهلا وسهلا");
    assert_eq!(response.query_result.transcript.as_deref(), Some("مرحبا"));
    Ok(())
}

#[tokio::test]
async fn test_request_wire_shape() -> Result<()> {
    let sessions = MockSessions::replying(&["ok"]);
    let client = common::client_with(sessions.clone());

    let text_input = client.build_query_input(&text_message("hi", None)).await?;
    let body = serde_json::to_value(DetectIntentRequest {
        query_input: text_input,
    })?;
    assert_eq!(
        body,
        serde_json::json!({"queryInput": {"text": {"text": "hi"}, "languageCode": "ar"}})
    );

    let wav = common::wav_bytes(16000, &[1]);
    let audio_input = client
        .build_query_input(&NormalizedMessage::new(String::new(), Some(wav), None)?)
        .await?;
    let body = serde_json::to_value(DetectIntentRequest {
        query_input: audio_input,
    })?;
    assert_eq!(
        body["queryInput"]["audio"]["config"],
        serde_json::json!({"audioEncoding": "AUDIO_ENCODING_LINEAR_16", "sampleRateHertz": 16000})
    );
    assert!(body["queryInput"]["audio"]["audio"].is_string());
    assert_eq!(body["queryInput"]["languageCode"], "ar");
    Ok(())
}

#[test]
fn test_endpoint_derivation() {
    let mut cfg = common::dialogflow_config();
    assert_eq!(cfg.endpoint(), "https://us-central1-dialogflow.googleapis.com");

    cfg.location = "global".to_string();
    assert_eq!(cfg.endpoint(), "https://dialogflow.googleapis.com");

    cfg.api_endpoint = Some("http://localhost:9999/".to_string());
    assert_eq!(cfg.endpoint(), "http://localhost:9999");
}

/// Connector that counts how many times it is asked to build a client
struct CountingConnector {
    connects: Arc<AtomicUsize>,
}

#[async_trait]
impl ClientConnector for CountingConnector {
    async fn connect(&self) -> dialog_relay::Result<ConversationClient> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Ok(common::client_with(MockSessions::replying(&["ok"])))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_client_initializes_once_under_concurrency() {
    let connects = Arc::new(AtomicUsize::new(0));
    let shared = Arc::new(SharedConversationClient::new(Box::new(CountingConnector {
        connects: connects.clone(),
    })));
    assert!(!shared.is_initialized());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let shared = shared.clone();
            tokio::spawn(async move { shared.get().await.is_ok() })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap());
    }

    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert!(shared.is_initialized());
}

struct FailingConnector {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl ClientConnector for FailingConnector {
    async fn connect(&self) -> dialog_relay::Result<ConversationClient> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AgentError::configuration("token endpoint unreachable"))
    }
}

#[tokio::test]
async fn test_failed_initialization_is_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let shared = SharedConversationClient::new(Box::new(FailingConnector {
        attempts: attempts.clone(),
    }));

    assert!(shared.get().await.is_err());
    assert!(shared.get().await.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(!shared.is_initialized());
}
