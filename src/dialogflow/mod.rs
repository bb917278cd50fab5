//! Conversational backend (Dialogflow CX) integration
//!
//! - `client`: request building, the detect-intent call, reply extraction
//! - `messages`: REST wire types
//! - `auth`: credential resolution and bearer tokens
//! - `shared`: the once-initialized client handle

pub mod auth;
pub mod client;
pub mod messages;
pub mod shared;

pub use auth::{CredentialSearch, Credentials, StaticTokenProvider, TokenProvider};
pub use client::{
    extract_reply_text, ConversationClient, ConversationReply, RestSessionsApi, SessionsApi,
};
pub use messages::{DetectIntentRequest, DetectIntentResponse, QueryInput, QueryVariant};
pub use shared::{ClientConnector, DialogflowConnector, SharedConversationClient};
