//! [`ContextStore`] over a PostgREST endpoint.
//!
//! Every call authenticates with the service key and reports failures with
//! a collaborator-specific 502 message; none of them retry.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::integration::{
    ButtonRow, CalendarSettingsRow, ChatWebhookRow, EmailFeatureRow, HttpActionRow,
};
use crate::domain::{
    AgentProfile, AnalyticsRecord, ContextStore, ConversationId, HistoryRow, IntegrationRows,
    OAuthConnection, OAuthProvider, QuotaUsage, TokenRefresh, TranscriptRecord,
};
use crate::error::{ChatError, ChatResult};

const HTTP_ACTION_FIELDS: &str = "id,title,description,url,headers,body_template";
const CONNECTION_FIELDS: &str = "access_token,refresh_token,token_type,expires_at";

fn connection_table(provider: OAuthProvider) -> &'static str {
    match provider {
        OAuthProvider::Gmail => "google_gmail_connections",
        OAuthProvider::Calendar => "google_calendar_connections",
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

pub struct RestStore {
    http: reqwest::Client,
    base_url: Option<String>,
    service_key: Option<SecretString>,
}

impl RestStore {
    pub fn new(http: reqwest::Client, base_url: Option<String>, service_key: Option<SecretString>) -> Self {
        Self {
            http,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            service_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> ChatResult<reqwest::RequestBuilder> {
        let (Some(base), Some(key)) = (self.base_url.as_deref(), self.service_key.as_ref()) else {
            return Err(ChatError::Configuration("store url or service key is not set".to_string()));
        };
        Ok(self
            .http
            .request(method, format!("{}/{}", base, path))
            .header("apikey", key.expose_secret())
            .bearer_auth(key.expose_secret()))
    }

    async fn send(builder: reqwest::RequestBuilder, unavailable: &str) -> ChatResult<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            tracing::warn!(error = %e, "store request failed");
            ChatError::Upstream(unavailable.to_string())
        })?;
        if !response.status().is_success() {
            tracing::warn!(status = response.status().as_u16(), "store returned an error status");
            return Err(ChatError::Upstream(unavailable.to_string()));
        }
        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, unavailable: &str) -> ChatResult<T> {
        response.json::<T>().await.map_err(|e| {
            tracing::warn!(error = %e, "store payload could not be decoded");
            ChatError::Upstream(unavailable.to_string())
        })
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        unavailable: &str,
    ) -> ChatResult<Vec<T>> {
        let builder = self
            .request(reqwest::Method::GET, table)?
            .header("Accept", "application/json")
            .query(query);
        let response = Self::send(builder, unavailable).await?;
        Self::read_json(response, unavailable).await
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        fields: &str,
        agent_id: &str,
        unavailable: &str,
    ) -> ChatResult<Option<T>> {
        let rows: Vec<T> = self
            .select(
                table,
                &[
                    ("select", fields.to_string()),
                    ("agent_id", eq(agent_id)),
                    ("limit", "1".to_string()),
                ],
                unavailable,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn select_for_agent<T: DeserializeOwned>(
        &self,
        table: &str,
        fields: &str,
        agent_id: &str,
    ) -> ChatResult<Vec<T>> {
        self.select(
            table,
            &[("select", fields.to_string()), ("agent_id", eq(agent_id))],
            "Actions service unavailable",
        )
        .await
    }

    async fn rpc(&self, function: &str, body: Value, unavailable: &str) -> ChatResult<Value> {
        let builder = self
            .request(reqwest::Method::POST, &format!("rpc/{}", function))?
            .header("Accept", "application/json")
            .json(&body);
        let response = Self::send(builder, unavailable).await?;
        Self::read_json(response, unavailable).await
    }

    async fn insert(&self, table: &str, body: Value, unavailable: &str) -> ChatResult<()> {
        let builder = self
            .request(reqwest::Method::POST, table)?
            .header("Prefer", "return=minimal")
            .json(&body);
        Self::send(builder, unavailable).await.map(|_| ())
    }

    fn conversation_query(
        fields: &str,
        agent_id: &str,
        conversation: &ConversationId,
        limit: usize,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("select", fields.to_string()),
            ("agent_id", eq(agent_id)),
            ("annon", eq(&conversation.anon_id)),
            ("chat_id", eq(&conversation.chat_id)),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.max(1).to_string()),
        ]
    }
}

#[derive(Deserialize)]
struct KeyRow {
    key: Option<String>,
}

#[derive(Deserialize)]
struct AgentRow {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    policies: Option<Value>,
    #[serde(default)]
    workspace_id: Option<Value>,
}

#[derive(Deserialize)]
struct MessageRow {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    result: Option<String>,
}

fn number(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Usage payload as a row or a single-element array. Non-numeric values mean no cap.
fn parse_usage(payload: &Value) -> QuotaUsage {
    let usage = match payload {
        Value::Array(rows) => rows.first(),
        other => Some(other),
    };
    let messages = number(usage.and_then(|u| u.get("messages")));
    let cap = number(usage.and_then(|u| u.get("cap")));
    match (messages, cap) {
        (Some(messages), Some(cap)) => QuotaUsage { messages, cap },
        _ => QuotaUsage {
            messages: 0,
            cap: u64::MAX,
        },
    }
}

fn policies(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    }
}

/// Search results may be plain strings or rows carrying the text.
fn chunk_texts(payload: Value) -> Vec<String> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("chunks") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            Value::Object(map) => ["text", "content", "chunk"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str).map(str::to_string)),
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .collect()
}

#[async_trait]
impl ContextStore for RestStore {
    async fn agent_api_key(&self, agent_id: &str) -> ChatResult<Option<String>> {
        let rows: Vec<KeyRow> = self
            .select(
                "api_keys",
                &[("agent_id", eq(agent_id)), ("select", "key".to_string())],
                "Authorization service unavailable",
            )
            .await?;
        Ok(rows.into_iter().next().map(|row| row.key.unwrap_or_default()))
    }

    async fn message_usage(&self, agent_id: &str) -> ChatResult<QuotaUsage> {
        let payload = self
            .rpc(
                "get_message_usage_service",
                json!({ "p_agent_id": agent_id }),
                "Usage service unavailable",
            )
            .await?;
        Ok(parse_usage(&payload))
    }

    async fn widget_enabled(&self, agent_id: &str) -> ChatResult<bool> {
        let row: Option<Value> = self
            .select_one("widget_embed", "id", agent_id, "Widget service unavailable")
            .await?;
        Ok(row.is_some())
    }

    async fn agent_profile(&self, agent_id: &str) -> ChatResult<AgentProfile> {
        let rows: Vec<AgentRow> = self
            .select(
                "agents",
                &[
                    ("select", "name,role,policies,workspace_id".to_string()),
                    ("id", eq(agent_id)),
                    ("limit", "1".to_string()),
                ],
                "Agent service unavailable",
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::NotFound("Agent not found".to_string()))?;
        Ok(AgentProfile {
            name: row.name.unwrap_or_default(),
            role: row.role.unwrap_or_default(),
            policies: policies(row.policies),
            workspace_id: row.workspace_id.and_then(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            }),
        })
    }

    async fn integration_rows(&self, agent_id: &str) -> ChatResult<IntegrationRows> {
        let unavailable = "Actions service unavailable";
        let (custom, zapier, make, chat, email, email_connection, calendar, calendar_connection, buttons) = tokio::try_join!(
            self.select_for_agent::<HttpActionRow>(
                "custom_api_actions",
                "id,title,description,url,method,headers,body_template",
                agent_id,
            ),
            self.select_for_agent::<HttpActionRow>("zapier_actions", HTTP_ACTION_FIELDS, agent_id),
            self.select_for_agent::<HttpActionRow>("make_actions", HTTP_ACTION_FIELDS, agent_id),
            self.select_for_agent::<ChatWebhookRow>(
                "slack_notifications",
                "id,title,description,webhook_url,username",
                agent_id,
            ),
            self.select_one::<EmailFeatureRow>("gmail_settings", "enabled,title,description", agent_id, unavailable),
            self.select_one::<OAuthConnection>(
                connection_table(OAuthProvider::Gmail),
                CONNECTION_FIELDS,
                agent_id,
                unavailable,
            ),
            self.select_one::<CalendarSettingsRow>("calendar_settings", "*", agent_id, unavailable),
            self.select_one::<OAuthConnection>(
                connection_table(OAuthProvider::Calendar),
                CONNECTION_FIELDS,
                agent_id,
                unavailable,
            ),
            self.select_for_agent::<ButtonRow>("custom_buttons", "id,label,description,url", agent_id),
        )?;

        Ok(IntegrationRows {
            custom_actions: custom,
            zapier_actions: zapier,
            make_actions: make,
            chat_webhooks: chat,
            email,
            email_connection,
            calendar,
            calendar_connection,
            buttons,
        })
    }

    async fn recent_history(
        &self,
        agent_id: &str,
        conversation: &ConversationId,
        limit: usize,
    ) -> ChatResult<Vec<HistoryRow>> {
        let rows: Vec<MessageRow> = self
            .select(
                "messages",
                &Self::conversation_query("prompt,result,created_at", agent_id, conversation, limit),
                "History service unavailable",
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| HistoryRow {
                prompt: row.prompt.unwrap_or_default(),
                result: row.result.unwrap_or_default(),
            })
            .collect())
    }

    async fn recent_prompts(
        &self,
        agent_id: &str,
        conversation: &ConversationId,
        limit: usize,
    ) -> ChatResult<Vec<String>> {
        let rows: Vec<MessageRow> = self
            .select(
                "messages",
                &Self::conversation_query("prompt,created_at", agent_id, conversation, limit),
                "History service unavailable",
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.prompt)
            .filter(|p| !p.trim().is_empty())
            .collect())
    }

    async fn search_knowledge(&self, agent_id: &str, embedding: &[f32]) -> ChatResult<Vec<String>> {
        let payload = self
            .rpc(
                "vector_search_texts",
                json!({ "p_agent_id": agent_id, "p_query_embedding": embedding }),
                "Vector search unavailable",
            )
            .await?;
        Ok(chunk_texts(payload))
    }

    async fn persist_transcript(&self, record: &TranscriptRecord) -> ChatResult<()> {
        self.insert(
            "messages",
            json!({
                "agent_id": record.agent_id,
                "workspace_id": record.workspace_id,
                "annon": record.anon_id,
                "chat_id": record.chat_id,
                "country": record.country,
                "prompt": record.prompt,
                "result": record.result,
                "source": record.source,
                "action": record.action,
            }),
            "Message service unavailable",
        )
        .await
    }

    async fn persist_analytics(&self, record: &AnalyticsRecord) -> ChatResult<()> {
        let latency = |ms: u64| if ms > 0 { json!(ms) } else { Value::Null };
        self.insert(
            "message_analytics",
            json!({
                "agent_id": record.agent_id,
                "workspace_id": record.workspace_id,
                "endpoint": record.endpoint,
                "source": record.source,
                "country": record.country,
                "annon": record.anon_id,
                "chat_id": record.chat_id,
                "model_mini": record.model_primary,
                "model_nano": record.model_followup,
                "mini_input_tokens": record.primary_input_tokens,
                "mini_output_tokens": record.primary_output_tokens,
                "nano_input_tokens": record.followup_input_tokens,
                "nano_output_tokens": record.followup_output_tokens,
                "action_used": record.action_used,
                "action_count": record.action_count,
                "rag_used": record.rag_used,
                "rag_chunk_count": record.rag_chunk_count,
                "status_code": record.status_code,
                "latency_total_ms": record.latency_total_ms,
                "latency_mini_ms": latency(record.latency_primary_ms),
                "latency_nano_ms": latency(record.latency_followup_ms),
                "latency_tools_ms": latency(record.latency_tools_ms),
                "error_code": (record.status_code >= 400).then(|| record.status_code.to_string()),
            }),
            "Message analytics service unavailable",
        )
        .await
    }

    async fn store_refreshed_token(
        &self,
        agent_id: &str,
        provider: OAuthProvider,
        refresh: &TokenRefresh,
    ) -> ChatResult<()> {
        let builder = self
            .request(reqwest::Method::PATCH, connection_table(provider))?
            .query(&[("agent_id", eq(agent_id))])
            .header("Prefer", "return=minimal")
            .json(&json!({
                "access_token": refresh.access_token,
                "token_type": refresh.token_type,
                "expires_at": refresh.expires_at,
                "updated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            }));
        Self::send(builder, "Connection service unavailable").await.map(|_| ())
    }

    async fn delete_connection(&self, agent_id: &str, provider: OAuthProvider) -> ChatResult<()> {
        let builder = self
            .request(reqwest::Method::DELETE, connection_table(provider))?
            .query(&[("agent_id", eq(agent_id))]);
        Self::send(builder, "Connection service unavailable").await.map(|_| ())
    }
}
