// Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use dialog_relay::config::{AudioConfig, DialogflowConfig};
use dialog_relay::dialogflow::messages::ResponseMessage;
use dialog_relay::dialogflow::{
    ConversationClient, DetectIntentRequest, DetectIntentResponse, SessionsApi,
};
use dialog_relay::{AgentError, AudioTranscoder};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

pub fn dialogflow_config() -> DialogflowConfig {
    DialogflowConfig {
        project_id: "test-project".to_string(),
        location: "us-central1".to_string(),
        agent_id: "agent-1".to_string(),
        language_code: "ar".to_string(),
        api_endpoint: None,
        request_timeout_secs: 5,
    }
}

/// Backend stand-in that records every call and answers with a fixed outcome
pub struct MockSessions {
    pub calls: Mutex<Vec<(String, DetectIntentRequest)>>,
    outcome: Result<DetectIntentResponse, String>,
}

impl MockSessions {
    pub fn replying(segments: &[&str]) -> Arc<Self> {
        let mut response = DetectIntentResponse::default();
        response
            .query_result
            .response_messages
            .push(ResponseMessage::text(segments));
        Self::with_response(response)
    }

    pub fn with_response(response: DetectIntentResponse) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            outcome: Ok(response),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            outcome: Err(message.to_string()),
        })
    }

    pub fn recorded(&self) -> Vec<(String, DetectIntentRequest)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionsApi for MockSessions {
    async fn detect_intent(
        &self,
        session_path: &str,
        request: &DetectIntentRequest,
    ) -> dialog_relay::Result<DetectIntentResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((session_path.to_string(), request.clone()));
        self.outcome.clone().map_err(AgentError::Backend)
    }
}

pub fn client_with(sessions: Arc<MockSessions>) -> ConversationClient {
    ConversationClient::new(
        sessions,
        &dialogflow_config(),
        AudioTranscoder::new(&AudioConfig::default()),
    )
}

/// In-memory 16-bit mono WAV
pub fn wav_bytes(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// One second of a 440 Hz tone
pub fn tone(sample_rate: u32) -> Vec<i16> {
    (0..sample_rate)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16
        })
        .collect()
}

pub fn ffmpeg_available() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
