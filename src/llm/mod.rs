//! Completion client for the Responses API.
//!
//! Both buffered and streamed calls end in the same [`CompletionResult`]:
//! either reply text, or the tool calls the model wants run. The raw output
//! items are kept so a follow-up call can thread them back verbatim.

mod error;
mod responses;
pub mod sse;
mod stream;

pub use error::{LlmError, LlmResult};
pub use responses::ResponsesClient;
pub use stream::{ResponseStreamState, StreamSignal};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{ActionResult, ChatMessage, Role, ToolCall, ToolDescriptor};

/// Directive placed ahead of every caller-supplied instruction block
pub const TOOL_RULES: &str = "TOOL RULES (MUST FOLLOW):\n- Use the provided tools when needed.\n- Never make the tool call without having the full info from the user.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    Reply,
    ActionsNeeded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub mode: ReplyMode,
    pub reply_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub output_items: Vec<Value>,
}

/// One completion leg
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<Value>,
    pub tools: Vec<ToolDescriptor>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
}

impl CompletionRequest {
    /// Request body, with the tool directive prepended to the instructions.
    pub fn to_body(&self, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "instructions": format!("{}\n\n{}", TOOL_RULES, self.instructions),
            "input": self.input,
        });
        if let Some(verbosity) = &self.verbosity {
            body["text"] = json!({ "verbosity": verbosity });
        }
        if let Some(effort) = &self.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }
        if !self.tools.is_empty() {
            body["tools"] = serde_json::to_value(&self.tools).unwrap_or_default();
            body["tool_choice"] = json!("auto");
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }
}

/// Receives text deltas as they arrive on a streamed call.
#[async_trait]
pub trait DeltaSink: Send + Sync {
    async fn push_delta(&self, text: &str);
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn invoke(&self, request: &CompletionRequest) -> LlmResult<CompletionResult>;

    async fn invoke_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn DeltaSink,
    ) -> LlmResult<CompletionResult>;
}

/// Converts chat messages into Responses API input items.
pub fn input_items(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let (role, part) = match message.role {
                Role::User => ("user", "input_text"),
                Role::Assistant => ("assistant", "output_text"),
            };
            json!({
                "type": "message",
                "role": role,
                "content": [{ "type": part, "text": message.content }],
            })
        })
        .collect()
}

pub fn function_call_output(result: &ActionResult) -> Value {
    let output = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
    json!({
        "type": "function_call_output",
        "call_id": result.call_id,
        "output": output,
    })
}

fn extract_tool_calls(items: &[Value]) -> Vec<ToolCall> {
    items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call"))
        .map(|item| {
            let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
            let call_id = item
                .get("call_id")
                .or_else(|| item.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            match item.get("arguments") {
                Some(Value::String(encoded)) => ToolCall::from_encoded(name, encoded, call_id),
                Some(Value::Object(map)) => ToolCall::new(name, Value::Object(map.clone()), call_id),
                _ => ToolCall::new(name, Value::Object(Default::default()), call_id),
            }
        })
        .collect()
}

fn collect_output_text(items: &[Value]) -> String {
    let mut text = String::new();
    for item in items {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(parts) = item.get("content").and_then(Value::as_array) else {
            continue;
        };
        for part in parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
        }
    }
    text
}

pub(crate) fn parse_usage(usage: Option<&Value>) -> TokenUsage {
    let read = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    TokenUsage {
        input_tokens: read("input_tokens"),
        output_tokens: read("output_tokens"),
    }
}

/// Shared extraction for buffered and streamed results.
///
/// Tool calls win over text; with neither the output is unusable.
pub(crate) fn finish_result(
    output_items: Vec<Value>,
    text: Option<String>,
    usage: TokenUsage,
) -> LlmResult<CompletionResult> {
    let tool_calls = extract_tool_calls(&output_items);
    if !tool_calls.is_empty() {
        return Ok(CompletionResult {
            mode: ReplyMode::ActionsNeeded,
            reply_text: String::new(),
            tool_calls,
            usage,
            output_items,
        });
    }

    let text = text
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| collect_output_text(&output_items));
    if text.trim().is_empty() {
        return Err(LlmError::EmptyOutput);
    }

    Ok(CompletionResult {
        mode: ReplyMode::Reply,
        reply_text: text.trim().to_string(),
        tool_calls: Vec::new(),
        usage,
        output_items,
    })
}

/// Parses a complete (non-streamed) response payload.
pub fn parse_response(payload: &Value) -> LlmResult<CompletionResult> {
    let items = payload
        .get("output")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let text = payload
        .get("output_text")
        .and_then(Value::as_str)
        .map(str::to_string);
    finish_result(items, text, parse_usage(payload.get("usage")))
}
