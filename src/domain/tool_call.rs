//! Tool calls requested by the model and the results of running them

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChatError;

/// A tool call extracted from model output. Consumed exactly once by dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub action_key: String,
    pub variables: Value,
    pub call_id: String,
}

impl ToolCall {
    pub fn new(action_key: impl Into<String>, variables: Value, call_id: impl Into<String>) -> Self {
        Self {
            action_key: action_key.into(),
            variables,
            call_id: call_id.into(),
        }
    }

    /// Parses the model's JSON-encoded arguments; anything malformed becomes `{}`.
    pub fn from_encoded(action_key: impl Into<String>, arguments: &str, call_id: impl Into<String>) -> Self {
        let variables = serde_json::from_str::<Value>(arguments)
            .ok()
            .filter(Value::is_object)
            .unwrap_or(Value::Object(Default::default()));
        Self::new(action_key, variables, call_id)
    }
}

/// The outbound request as it was sent, minus credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub ok: bool,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn success(status: u16, body: Value) -> Self {
        Self {
            ok: true,
            status,
            body: Some(body),
            error: None,
        }
    }

    /// Non-success upstream answer; the body is kept verbatim for the model.
    pub fn rejected(status: u16, body: Value) -> Self {
        Self {
            ok: false,
            status,
            body: Some(body),
            error: None,
        }
    }

    pub fn from_error(err: &ChatError) -> Self {
        Self {
            ok: false,
            status: err.status().as_u16(),
            body: None,
            error: Some(err.public_message()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub call_id: String,
    pub action_key: String,
    #[serde(default)]
    pub request: Option<RequestSnapshot>,
    pub response: ActionResponse,
}

impl ActionResult {
    pub fn unknown(call: &ToolCall) -> Self {
        let err = ChatError::Validation(format!("Unknown action: {}", call.action_key));
        Self {
            call_id: call.call_id.clone(),
            action_key: call.action_key.clone(),
            request: None,
            response: ActionResponse::from_error(&err),
        }
    }
}
