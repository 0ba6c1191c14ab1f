//! Accumulates a streamed Responses API call into a [`CompletionResult`]

use serde_json::Value;

use super::sse::SseEvent;
use super::{finish_result, parse_usage, CompletionResult, LlmError, LlmResult, TokenUsage};

/// What the caller should do after applying an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// Forward this text to the client
    Delta(String),
    Continue,
    /// Terminal event seen; stop reading
    Finished,
}

#[derive(Debug, Default)]
pub struct ResponseStreamState {
    text: String,
    items: Vec<Value>,
    final_items: Option<Vec<Value>>,
    usage: TokenUsage,
}

impl ResponseStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &SseEvent) -> LlmResult<StreamSignal> {
        if event.is_done() {
            return Ok(StreamSignal::Finished);
        }

        let payload: Value = match serde_json::from_str(&event.data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable stream event");
                return Ok(StreamSignal::Continue);
            }
        };

        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .or(event.event.as_deref())
            .unwrap_or_default();

        match kind {
            "response.output_text.delta" => {
                let delta = payload.get("delta").and_then(Value::as_str).unwrap_or_default();
                if delta.is_empty() {
                    return Ok(StreamSignal::Continue);
                }
                self.text.push_str(delta);
                Ok(StreamSignal::Delta(delta.to_string()))
            }
            "response.output_item.done" => {
                if let Some(item) = payload.get("item") {
                    self.items.push(item.clone());
                }
                Ok(StreamSignal::Continue)
            }
            "response.completed" | "response.incomplete" => {
                if let Some(response) = payload.get("response") {
                    self.usage = parse_usage(response.get("usage"));
                    if let Some(output) = response.get("output").and_then(Value::as_array) {
                        if !output.is_empty() {
                            self.final_items = Some(output.clone());
                        }
                    }
                }
                Ok(StreamSignal::Finished)
            }
            "response.failed" | "response.error" | "error" => Err(LlmError::Failed(failure_message(&payload))),
            _ => Ok(StreamSignal::Continue),
        }
    }

    pub fn into_result(self) -> LlmResult<CompletionResult> {
        let items = self.final_items.unwrap_or(self.items);
        finish_result(items, Some(self.text), self.usage)
    }
}

fn failure_message(payload: &Value) -> String {
    [
        payload.pointer("/response/error/message"),
        payload.pointer("/error/message"),
        payload.get("message"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .unwrap_or("Model response failed")
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ReplyMode;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_text_deltas_accumulate() {
        let mut state = ResponseStreamState::new();
        assert_eq!(
            state.apply(&event(r#"{"type":"response.output_text.delta","delta":"Hel"}"#)).unwrap(),
            StreamSignal::Delta("Hel".into())
        );
        state.apply(&event(r#"{"type":"response.output_text.delta","delta":"lo"}"#)).unwrap();
        assert_eq!(
            state
                .apply(&event(r#"{"type":"response.completed","response":{"usage":{"input_tokens":5,"output_tokens":2}}}"#))
                .unwrap(),
            StreamSignal::Finished
        );
        let result = state.into_result().unwrap();
        assert_eq!(result.mode, ReplyMode::Reply);
        assert_eq!(result.reply_text, "Hello");
        assert_eq!(result.usage.input_tokens, 5);
    }

    #[test]
    fn test_tool_call_items_from_item_done() {
        let mut state = ResponseStreamState::new();
        state
            .apply(&event(
                r#"{"type":"response.output_item.done","item":{"type":"function_call","name":"book","arguments":"{}","call_id":"c1"}}"#,
            ))
            .unwrap();
        assert_eq!(state.apply(&event("[DONE]")).unwrap(), StreamSignal::Finished);
        let result = state.into_result().unwrap();
        assert_eq!(result.mode, ReplyMode::ActionsNeeded);
        assert_eq!(result.tool_calls[0].call_id, "c1");
    }

    #[test]
    fn test_event_name_used_when_type_missing() {
        let mut state = ResponseStreamState::new();
        let signal = state
            .apply(&SseEvent {
                event: Some("response.output_text.delta".into()),
                data: r#"{"delta":"x"}"#.into(),
            })
            .unwrap();
        assert_eq!(signal, StreamSignal::Delta("x".into()));
    }

    #[test]
    fn test_failure_event() {
        let mut state = ResponseStreamState::new();
        let err = state
            .apply(&event(r#"{"type":"response.failed","response":{"error":{"message":"overloaded"}}}"#))
            .unwrap_err();
        assert!(matches!(err, LlmError::Failed(msg) if msg == "overloaded"));
    }

    #[test]
    fn test_garbage_is_skipped_and_empty_stream_fails() {
        let mut state = ResponseStreamState::new();
        assert_eq!(state.apply(&event("{not json")).unwrap(), StreamSignal::Continue);
        assert!(matches!(state.into_result(), Err(LlmError::EmptyOutput)));
    }
}
