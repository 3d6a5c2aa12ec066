use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("assistant error: {0} - {1}")]
    Status(StatusCode, String),

    #[error("failed to parse assistant response: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("malformed {event} event: {message}")]
    MalformedEvent { event: String, message: String },

    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

impl AssistantError {
    /// HTTP status of the failed call, when the service answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(status, _) => Some(*status),
            Self::Request(e) => e.status(),
            _ => None,
        }
    }
}
