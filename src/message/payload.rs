use serde::Deserialize;

/// JSON body accepted by the message endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonMessage {
    /// Plain text message
    #[serde(default)]
    pub message: Option<String>,

    /// Base64-encoded recorded audio
    #[serde(default)]
    pub audio_data: Option<String>,

    /// Session to continue (overrides the query parameter)
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Everything the transport layer decoded from one inbound request.
///
/// Several channels may be present at once; `normalize` decides precedence.
#[derive(Debug, Clone, Default)]
pub struct RawPayload {
    /// Parsed JSON body, if the request carried one
    pub json: Option<JsonMessage>,

    /// `message` field of a form-encoded or multipart body
    pub form_text: Option<String>,

    /// Bytes of an uploaded audio file part
    pub upload: Option<Vec<u8>>,

    /// `session_id` supplied out of band (query string or form field)
    pub query_session_id: Option<String>,
}

impl RawPayload {
    pub fn from_json(json: JsonMessage) -> Self {
        Self {
            json: Some(json),
            ..Self::default()
        }
    }

    pub fn with_query_session_id(mut self, session_id: Option<String>) -> Self {
        self.query_session_id = session_id;
        self
    }
}
