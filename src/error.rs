//! Request-level error taxonomy and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm::LlmError;

/// Everything that can end a chat request early.
///
/// Collaborators report failures as values of this type and the status code
/// travels with the variant, so handlers never have to reinterpret them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// A required secret or endpoint is not configured
    #[error("Server configuration error: {0}")]
    Configuration(String),

    /// Required request fields are absent
    #[error("Missing required fields")]
    MissingFields(Vec<String>),

    /// Malformed request or unresolvable action
    #[error("{0}")]
    Validation(String),

    /// Bearer credential rejected
    #[error("{0}")]
    Unauthorized(String),

    /// Origin or channel not permitted
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Requested slot is busy or outside open hours
    #[error("{0}")]
    SchedulingConflict(String),

    /// Message cap reached
    #[error("{0}")]
    QuotaExceeded(String),

    /// A collaborator or integration could not be reached or answered badly
    #[error("{0}")]
    Upstream(String),

    /// The completion service returned something unusable
    #[error("{0}")]
    ModelOutput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Configuration(_) | ChatError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ChatError::MissingFields(_) | ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ChatError::SchedulingConflict(_) => StatusCode::CONFLICT,
            ChatError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ChatError::Upstream(_) | ChatError::ModelOutput(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Text safe to show a caller. Configuration and internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Configuration(_) => "Server configuration error".to_string(),
            ChatError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Configuration(msg) => ChatError::Configuration(msg),
            LlmError::Parse(_) => ChatError::ModelOutput("Invalid JSON from OpenAI".to_string()),
            LlmError::EmptyOutput => ChatError::ModelOutput("Empty model output".to_string()),
            LlmError::Failed(msg) => ChatError::ModelOutput(msg),
            LlmError::Api { message, .. } => ChatError::Upstream(message),
            LlmError::Network(_) | LlmError::Timeout => {
                ChatError::Upstream("Network error calling OpenAI".to_string())
            }
            LlmError::Streaming(msg) => ChatError::Upstream(msg),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "chat request failed");
        }
        let body = match &self {
            ChatError::MissingFields(missing) => json!({
                "error": self.public_message(),
                "missing": missing,
            }),
            _ => json!({ "error": self.public_message() }),
        };
        (status, Json(body)).into_response()
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
