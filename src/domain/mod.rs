//! Domain types and the ports the orchestrator talks through

pub mod action;
pub mod agent;
pub mod integration;
pub mod records;
pub mod request;
pub mod tool_call;

pub use action::{ActionDefinition, ActionKind, CalendarSettings, HttpTarget, RelayService, ToolDescriptor};
pub use agent::{AgentProfile, ChatMessage, HistoryRow, QuotaUsage, Role};
pub use integration::{IntegrationRows, OAuthConnection, OAuthProvider};
pub use records::{AnalyticsRecord, TokenRefresh, TranscriptRecord};
pub use request::{Channel, ConversationId, RequestContext};
pub use tool_call::{ActionResponse, ActionResult, RequestSnapshot, ToolCall};

use async_trait::async_trait;

use crate::error::ChatResult;

/// Storage-backed collaborators.
///
/// Implementations report failures as [`crate::error::ChatError`] values carrying
/// the status the caller should see; they never retry.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// The key registered for an agent, `None` when the agent is unknown
    async fn agent_api_key(&self, agent_id: &str) -> ChatResult<Option<String>>;

    async fn message_usage(&self, agent_id: &str) -> ChatResult<QuotaUsage>;

    async fn widget_enabled(&self, agent_id: &str) -> ChatResult<bool>;

    async fn agent_profile(&self, agent_id: &str) -> ChatResult<AgentProfile>;

    async fn integration_rows(&self, agent_id: &str) -> ChatResult<IntegrationRows>;

    /// Stored exchanges, most recent first
    async fn recent_history(
        &self,
        agent_id: &str,
        conversation: &ConversationId,
        limit: usize,
    ) -> ChatResult<Vec<HistoryRow>>;

    /// Prior prompts in this conversation, most recent first
    async fn recent_prompts(
        &self,
        agent_id: &str,
        conversation: &ConversationId,
        limit: usize,
    ) -> ChatResult<Vec<String>>;

    async fn search_knowledge(&self, agent_id: &str, embedding: &[f32]) -> ChatResult<Vec<String>>;

    async fn persist_transcript(&self, record: &TranscriptRecord) -> ChatResult<()>;

    async fn persist_analytics(&self, record: &AnalyticsRecord) -> ChatResult<()>;

    async fn store_refreshed_token(
        &self,
        agent_id: &str,
        provider: OAuthProvider,
        refresh: &TokenRefresh,
    ) -> ChatResult<()>;

    async fn delete_connection(&self, agent_id: &str, provider: OAuthProvider) -> ChatResult<()>;
}

/// Text embedding for knowledge search
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> ChatResult<Vec<f32>>;
}
