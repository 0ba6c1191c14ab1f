//! Rows written once a turn completes

use serde::{Deserialize, Serialize};

/// The finished exchange, persisted before the caller sees a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub agent_id: String,
    pub workspace_id: Option<String>,
    pub anon_id: String,
    pub chat_id: String,
    pub country: Option<String>,
    pub prompt: String,
    pub result: String,
    pub source: String,
    pub action: bool,
}

/// Best-effort usage analytics for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub agent_id: String,
    pub workspace_id: Option<String>,
    pub endpoint: String,
    pub source: String,
    pub country: Option<String>,
    pub anon_id: String,
    pub chat_id: String,
    pub model_primary: String,
    pub model_followup: Option<String>,
    pub primary_input_tokens: u64,
    pub primary_output_tokens: u64,
    pub followup_input_tokens: u64,
    pub followup_output_tokens: u64,
    pub action_used: bool,
    pub action_count: usize,
    pub rag_used: bool,
    pub rag_chunk_count: usize,
    pub status_code: u16,
    pub latency_total_ms: u64,
    pub latency_primary_ms: u64,
    pub latency_followup_ms: u64,
    pub latency_tools_ms: u64,
}

/// A freshly refreshed token to write back onto a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRefresh {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<String>,
}
