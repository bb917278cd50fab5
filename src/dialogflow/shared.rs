use super::auth::Credentials;
use super::client::{ConversationClient, RestSessionsApi};
use crate::audio::AudioTranscoder;
use crate::config::{AudioConfig, DialogflowConfig};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Builds the process-wide `ConversationClient` on first use
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self) -> Result<ConversationClient>;
}

/// Connects to Dialogflow CX with credentials resolved at startup
pub struct DialogflowConnector {
    dialogflow: DialogflowConfig,
    audio: AudioConfig,
    credentials: Credentials,
}

impl DialogflowConnector {
    pub fn new(dialogflow: DialogflowConfig, audio: AudioConfig, credentials: Credentials) -> Self {
        Self {
            dialogflow,
            audio,
            credentials,
        }
    }
}

#[async_trait]
impl ClientConnector for DialogflowConnector {
    async fn connect(&self) -> Result<ConversationClient> {
        let http = reqwest::Client::builder()
            .timeout(self.dialogflow.request_timeout())
            .build()
            .map_err(|e| AgentError::configuration(format!("cannot build HTTP client: {}", e)))?;

        let endpoint = self.dialogflow.endpoint();
        info!(
            "Connecting to {} as {}",
            endpoint,
            self.credentials.describe()
        );

        let tokens = self.credentials.clone().into_token_provider(http.clone());
        let sessions = Arc::new(RestSessionsApi::new(http, endpoint, tokens));

        Ok(ConversationClient::new(
            sessions,
            &self.dialogflow,
            AudioTranscoder::new(&self.audio),
        ))
    }
}

/// Lazily initialized, shared conversation client.
///
/// Concurrent cold-start callers wait on the same initialization; a failed
/// initialization is not cached, so the next request tries again.
pub struct SharedConversationClient {
    cell: OnceCell<ConversationClient>,
    connector: Option<Box<dyn ClientConnector>>,
}

impl SharedConversationClient {
    pub fn new(connector: Box<dyn ClientConnector>) -> Self {
        Self {
            cell: OnceCell::new(),
            connector: Some(connector),
        }
    }

    /// Wrap an already-built client.
    pub fn ready(client: ConversationClient) -> Self {
        Self {
            cell: OnceCell::new_with(Some(client)),
            connector: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<&ConversationClient> {
        self.cell
            .get_or_try_init(|| async {
                let connector = self.connector.as_ref().ok_or_else(|| {
                    AgentError::configuration("conversation client has no connector")
                })?;
                info!("Initializing conversational backend client");
                connector.connect().await
            })
            .await
    }
}
