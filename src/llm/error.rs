//! Error types for completion calls

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// API key or endpoint not configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Non-success HTTP status from the completion service
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Transport broke mid-stream
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Response body was not valid JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// Neither text nor tool calls came back
    #[error("Empty model output")]
    EmptyOutput,

    /// The service reported a failed response
    #[error("Model response failed: {0}")]
    Failed(String),

    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Network(format!("Connection error: {}", err))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;
