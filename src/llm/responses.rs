//! Responses API provider with streaming support

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::sse::SseDecoder;
use super::stream::{ResponseStreamState, StreamSignal};
use super::{parse_response, CompletionProvider, CompletionRequest, CompletionResult, DeltaSink, LlmError, LlmResult};

pub struct ResponsesClient {
    http: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    timeout: Duration,
}

impl ResponsesClient {
    pub fn new(
        http: reqwest::Client,
        api_key: Option<SecretString>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.base_url.trim_end_matches('/'))
    }

    fn request(&self, body: &Value) -> LlmResult<reqwest::RequestBuilder> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::Configuration("completion API key is not set".to_string()))?;
        Ok(self
            .http
            .post(self.endpoint())
            .bearer_auth(key.expose_secret())
            .json(body))
    }

    async fn check_status(response: reqwest::Response) -> LlmResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&error_text)
            .ok()
            .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("Completion service returned {}", status.as_u16()));
        Err(LlmError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CompletionProvider for ResponsesClient {
    async fn invoke(&self, request: &CompletionRequest) -> LlmResult<CompletionResult> {
        let response = self
            .request(&request.to_body(false))?
            .timeout(self.timeout)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let bytes = response.bytes().await?;
        let payload: Value = serde_json::from_slice(&bytes)
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        parse_response(&payload)
    }

    async fn invoke_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn DeltaSink,
    ) -> LlmResult<CompletionResult> {
        let response = self.request(&request.to_body(true))?.send().await?;
        let response = Self::check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut state = ResponseStreamState::new();
        let mut finished = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Streaming(e.to_string()))?;
            for event in decoder.push(&chunk) {
                match state.apply(&event)? {
                    StreamSignal::Delta(text) => sink.push_delta(&text).await,
                    StreamSignal::Continue => {}
                    StreamSignal::Finished => {
                        finished = true;
                        break 'read;
                    }
                }
            }
        }

        if !finished {
            if let Some(event) = decoder.finish() {
                if let StreamSignal::Delta(text) = state.apply(&event)? {
                    sink.push_delta(&text).await;
                }
            }
        }

        state.into_result()
    }
}
