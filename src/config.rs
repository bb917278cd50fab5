use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `RELAY__SERVICE__HTTP__PORT=9000`.
const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub dialogflow: DialogflowConfig,
    pub audio: AudioConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Agent coordinates and call settings for the conversational backend.
#[derive(Debug, Clone, Deserialize)]
pub struct DialogflowConfig {
    pub project_id: String,
    pub location: String,
    pub agent_id: String,
    pub language_code: String,
    /// Overrides the regional endpoint derived from `location`.
    #[serde(default)]
    pub api_endpoint: Option<String>,
    pub request_timeout_secs: u64,
}

impl DialogflowConfig {
    /// Regional REST endpoint for the configured location.
    pub fn endpoint(&self) -> String {
        if let Some(endpoint) = &self.api_endpoint {
            return endpoint.trim_end_matches('/').to_string();
        }

        if self.location == "global" {
            "https://dialogflow.googleapis.com".to_string()
        } else {
            format!("https://{}-dialogflow.googleapis.com", self.location)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub target_sample_rate: u32,
    pub conversion_timeout_secs: u64,
    pub ffmpeg_path: String,
}

impl AudioConfig {
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            conversion_timeout_secs: 30,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    /// Explicit path to a credentials JSON file (`~` is expanded).
    #[serde(default)]
    pub file: Option<String>,
}

impl Config {
    /// Load defaults, then the optional config file at `path`, then `RELAY__*` env overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "dialog-relay")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8000)?
            .set_default("dialogflow.project_id", "girlies-ai-agent")?
            .set_default("dialogflow.location", "us-central1")?
            .set_default("dialogflow.agent_id", "4a8116a1-9f58-4b71-8cf0-f2faee516a2d")?
            .set_default("dialogflow.language_code", "ar")?
            .set_default("dialogflow.request_timeout_secs", 30)?
            .set_default("audio.target_sample_rate", 16000)?
            .set_default("audio.conversion_timeout_secs", 30)?
            .set_default("audio.ffmpeg_path", "ffmpeg")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
