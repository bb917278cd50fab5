//! Inbound message ingestion
//!
//! Transport-decoded payloads (`RawPayload`) are collapsed into one
//! `NormalizedMessage` by `normalize`.

mod normalize;
mod payload;

pub use normalize::{new_session_id, normalize, NormalizedMessage};
pub use payload::{JsonMessage, RawPayload};
