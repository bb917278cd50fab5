pub mod audio;
pub mod config;
pub mod dialogflow;
pub mod error;
pub mod http;
pub mod message;

pub use audio::{AudioEncoding, AudioEncodingSpec, AudioFormat, AudioTranscoder, PreparedAudio};
pub use config::Config;
pub use dialogflow::{
    ConversationClient, ConversationReply, Credentials, SessionsApi, SharedConversationClient,
};
pub use error::{AgentError, Result};
pub use http::{create_router, AppState};
pub use message::{normalize, JsonMessage, NormalizedMessage, RawPayload};
