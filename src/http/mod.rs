//! HTTP front-end
//!
//! - GET  /                            - Greeting
//! - GET  /health                      - Health check
//! - POST /ai-agent/message            - Text, base64 audio, or uploaded audio
//! - POST /ai-agent/ai-agent-message   - Legacy text-only route (query parameters)

mod handlers;
mod routes;
mod state;

pub use handlers::MessageResponse;
pub use routes::{create_router, MAX_BODY_BYTES};
pub use state::AppState;
