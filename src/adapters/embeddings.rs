use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::domain::Embedder;
use crate::error::{ChatError, ChatResult};

const UNAVAILABLE: &str = "Embedding service unavailable";

/// OpenAI-compatible `/embeddings` client
pub struct EmbeddingsClient {
    http: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl EmbeddingsClient {
    pub fn new(
        http: reqwest::Client,
        api_key: Option<SecretString>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url.into(),
            model: model.into(),
            timeout,
        }
    }
}

fn parse_embedding(payload: &Value) -> Option<Vec<f32>> {
    let values = payload.pointer("/data/0/embedding")?.as_array()?;
    let embedding: Vec<f32> = values.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect();
    (!embedding.is_empty() && embedding.len() == values.len()).then_some(embedding)
}

#[async_trait]
impl Embedder for EmbeddingsClient {
    async fn embed(&self, text: &str) -> ChatResult<Vec<f32>> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ChatError::Configuration("embedding API key is not set".to_string()))?;

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .bearer_auth(key.expose_secret())
            .timeout(self.timeout)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "embedding request failed");
                ChatError::Upstream(UNAVAILABLE.to_string())
            })?;

        if !response.status().is_success() {
            tracing::warn!(status = response.status().as_u16(), "embedding service returned an error status");
            return Err(ChatError::Upstream(UNAVAILABLE.to_string()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|_| ChatError::Upstream(UNAVAILABLE.to_string()))?;
        parse_embedding(&payload).ok_or_else(|| ChatError::Upstream(UNAVAILABLE.to_string()))
    }
}
