use crate::dialogflow::SharedConversationClient;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Process-wide conversational backend client, built on first use
    pub client: Arc<SharedConversationClient>,
}

impl AppState {
    pub fn new(client: SharedConversationClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}
