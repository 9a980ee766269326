//! Transport to the assistant's HTTP API.
//!
//! Every call goes to one fixed origin. There is no retry, no timeout and no
//! idempotency key: callers turn failures into a single bot-visible line.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::documents::ExtractEndpoint;
use types::{ChatReply, ChatRequest, ExtractedInfo, FilePart};

pub use client::ApiClient;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Status {
        status: u16,
        message: Option<String>,
    },
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Server-provided explanation, if the failure carried one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status {
                message: Some(message),
                ..
            } => Some(message),
            _ => None,
        }
    }
}

/// The operations the session controller needs from the assistant's API.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Origin every call is made against, without a trailing slash.
    fn base_url(&self) -> &str;

    /// `POST /chat/`
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ApiError>;

    /// `POST /upload/`, returning the stored file path.
    async fn upload(&self, file: FilePart) -> Result<String, ApiError>;

    /// `POST /transcribe/`, returning the raw transcript.
    async fn transcribe(&self, audio: FilePart) -> Result<String, ApiError>;

    /// `POST /extract-*/` with the file and the captured user id.
    async fn extract(
        &self,
        endpoint: ExtractEndpoint,
        file: FilePart,
        user_id: &str,
    ) -> Result<ExtractedInfo, ApiError>;

    /// `GET /pdf/{name}`
    async fn fetch_document(&self, name: &str) -> Result<Vec<u8>, ApiError>;

    fn document_url(&self, name: &str) -> String {
        format!("{}/pdf/{}", self.base_url(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = ApiError::Status {
            status: 500,
            message: None,
        };
        assert_eq!(err.to_string(), "server returned 500");

        let err = ApiError::Status {
            status: 422,
            message: Some("Image too blurry".to_string()),
        };
        assert_eq!(err.to_string(), "server returned 422: Image too blurry");
        assert_eq!(err.server_message(), Some("Image too blurry"));
    }

    #[test]
    fn test_missing_field_display() {
        let err = ApiError::MissingField("transcript");
        assert_eq!(err.to_string(), "response is missing `transcript`");
        assert_eq!(err.server_message(), None);
    }
}
