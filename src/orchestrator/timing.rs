//! Step timings reported back to API callers

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;

pub const VALIDATE_AGENT_KEY: &str = "validate_agent_key_ms";
pub const CHECK_MESSAGE_CAP: &str = "check_message_cap_ms";
pub const RAG_RECENT_PROMPTS: &str = "rag_recent_prompts_ms";
pub const RAG_EMBEDDING: &str = "rag_embedding_ms";
pub const RAG_VECTOR_SEARCH: &str = "rag_vector_search_ms";
pub const HISTORY_FETCH: &str = "history_fetch_ms";
pub const AGENT_INFO_FETCH: &str = "agent_info_fetch_ms";
pub const ACTIONS_FETCH: &str = "actions_fetch_ms";
pub const PROMPT_BUILD: &str = "prompt_build_ms";
pub const MODEL_PRIMARY: &str = "model_primary_ms";
pub const TOOL_EXECUTION: &str = "tool_execution_ms";
pub const MODEL_FOLLOWUP: &str = "model_followup_ms";
pub const SAVE_MESSAGE: &str = "save_message_ms";
pub const SAVE_ANALYTICS_DISPATCH: &str = "save_analytics_dispatch_ms";
pub const TOTAL: &str = "total_ms";

/// Runs a future and reports how long it took.
pub async fn timed<F: Future>(fut: F) -> (F::Output, u64) {
    let started = Instant::now();
    let output = fut.await;
    (output, started.elapsed().as_millis() as u64)
}

#[derive(Debug, Clone)]
pub struct TimingRecorder {
    started: Instant,
    steps: BTreeMap<&'static str, u64>,
}

impl Default for TimingRecorder {
    fn default() -> Self {
        Self::start()
    }
}

impl TimingRecorder {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            steps: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, step: &'static str, ms: u64) {
        self.steps.insert(step, ms);
    }

    pub fn get(&self, step: &str) -> u64 {
        self.steps.get(step).copied().unwrap_or(0)
    }

    pub fn total_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// All recorded steps plus the running total.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let mut steps: BTreeMap<String, u64> = self
            .steps
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        steps.insert(TOTAL.to_string(), self.total_ms());
        steps
    }
}
