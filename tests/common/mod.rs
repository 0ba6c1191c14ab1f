//! Shared fixtures: an in-memory store, a scripted completion provider,
//! a counting embedder and throwaway upstream servers.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use parley::adapters::chat_handler::{ChatState, WidgetPolicy};
use parley::adapters::health_handler::HealthHandler;
use parley::config::Settings;
use parley::dispatch::{ActionDispatcher, DispatchConfig};
use parley::domain::{
    AgentProfile, AnalyticsRecord, ContextStore, ConversationId, Embedder, HistoryRow,
    IntegrationRows, OAuthProvider, QuotaUsage, TokenRefresh, ToolCall, TranscriptRecord,
};
use parley::error::{ChatError, ChatResult};
use parley::llm::{
    CompletionProvider, CompletionRequest, CompletionResult, DeltaSink, LlmError, LlmResult,
    ReplyMode, TokenUsage,
};
use parley::oauth::{OAuthClientConfig, TokenManager};
use parley::orchestrator::{Orchestrator, OrchestratorConfig};
use serde_json::{json, Value};

pub const AGENT: &str = "agent_1";
pub const API_KEY: &str = "key_123";

/// Everything the in-memory store holds or has been asked to write
#[derive(Default)]
pub struct StoreState {
    pub api_keys: HashMap<String, String>,
    pub usage: Option<QuotaUsage>,
    pub widget_agents: HashSet<String>,
    pub profile: AgentProfile,
    pub rows: IntegrationRows,
    pub history: Vec<HistoryRow>,
    pub prompts: Vec<String>,
    pub knowledge: Vec<String>,
    pub transcripts: Vec<TranscriptRecord>,
    pub analytics: Vec<AnalyticsRecord>,
    pub refreshed: Vec<(String, OAuthProvider, TokenRefresh)>,
    pub deleted: Vec<(String, OAuthProvider)>,
    pub searches: usize,
    /// Operation name -> error it should fail with
    pub failures: HashMap<&'static str, ChatError>,
}

#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<StoreState>,
}

impl MemoryStore {
    /// A store with one agent, one API key and a profile.
    pub fn with_agent() -> Arc<Self> {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            state.api_keys.insert(AGENT.to_string(), API_KEY.to_string());
            state.profile = AgentProfile {
                name: "Ava".to_string(),
                role: "Front desk assistant".to_string(),
                policies: vec!["Be brief".to_string()],
                workspace_id: Some("ws_1".to_string()),
            };
        }
        Arc::new(store)
    }

    pub fn update(&self, f: impl FnOnce(&mut StoreState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn fail(&self, op: &'static str, err: ChatError) {
        self.state.lock().unwrap().failures.insert(op, err);
    }

    fn check(&self, op: &'static str) -> ChatResult<()> {
        match self.state.lock().unwrap().failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn transcripts(&self) -> Vec<TranscriptRecord> {
        self.state.lock().unwrap().transcripts.clone()
    }

    pub fn analytics(&self) -> Vec<AnalyticsRecord> {
        self.state.lock().unwrap().analytics.clone()
    }

    pub fn deleted(&self) -> Vec<(String, OAuthProvider)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn refreshed(&self) -> Vec<(String, OAuthProvider, TokenRefresh)> {
        self.state.lock().unwrap().refreshed.clone()
    }

    /// Waits for the detached analytics write to land.
    pub async fn wait_for_analytics(&self) -> Vec<AnalyticsRecord> {
        for _ in 0..50 {
            let analytics = self.analytics();
            if !analytics.is_empty() {
                return analytics;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Vec::new()
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn agent_api_key(&self, agent_id: &str) -> ChatResult<Option<String>> {
        self.check("agent_api_key")?;
        Ok(self.state.lock().unwrap().api_keys.get(agent_id).cloned())
    }

    async fn message_usage(&self, _agent_id: &str) -> ChatResult<QuotaUsage> {
        self.check("message_usage")?;
        Ok(self.state.lock().unwrap().usage.unwrap_or(QuotaUsage {
            messages: 0,
            cap: 100,
        }))
    }

    async fn widget_enabled(&self, agent_id: &str) -> ChatResult<bool> {
        self.check("widget_enabled")?;
        Ok(self.state.lock().unwrap().widget_agents.contains(agent_id))
    }

    async fn agent_profile(&self, _agent_id: &str) -> ChatResult<AgentProfile> {
        self.check("agent_profile")?;
        Ok(self.state.lock().unwrap().profile.clone())
    }

    async fn integration_rows(&self, _agent_id: &str) -> ChatResult<IntegrationRows> {
        self.check("integration_rows")?;
        Ok(self.state.lock().unwrap().rows.clone())
    }

    async fn recent_history(
        &self,
        _agent_id: &str,
        _conversation: &ConversationId,
        limit: usize,
    ) -> ChatResult<Vec<HistoryRow>> {
        self.check("recent_history")?;
        Ok(self.state.lock().unwrap().history.iter().take(limit).cloned().collect())
    }

    async fn recent_prompts(
        &self,
        _agent_id: &str,
        _conversation: &ConversationId,
        limit: usize,
    ) -> ChatResult<Vec<String>> {
        self.check("recent_prompts")?;
        Ok(self.state.lock().unwrap().prompts.iter().take(limit).cloned().collect())
    }

    async fn search_knowledge(&self, _agent_id: &str, _embedding: &[f32]) -> ChatResult<Vec<String>> {
        self.check("search_knowledge")?;
        let mut state = self.state.lock().unwrap();
        state.searches += 1;
        Ok(state.knowledge.clone())
    }

    async fn persist_transcript(&self, record: &TranscriptRecord) -> ChatResult<()> {
        self.check("persist_transcript")?;
        self.state.lock().unwrap().transcripts.push(record.clone());
        Ok(())
    }

    async fn persist_analytics(&self, record: &AnalyticsRecord) -> ChatResult<()> {
        self.check("persist_analytics")?;
        self.state.lock().unwrap().analytics.push(record.clone());
        Ok(())
    }

    async fn store_refreshed_token(
        &self,
        agent_id: &str,
        provider: OAuthProvider,
        refresh: &TokenRefresh,
    ) -> ChatResult<()> {
        self.state
            .lock()
            .unwrap()
            .refreshed
            .push((agent_id.to_string(), provider, refresh.clone()));
        Ok(())
    }

    async fn delete_connection(&self, agent_id: &str, provider: OAuthProvider) -> ChatResult<()> {
        self.state
            .lock()
            .unwrap()
            .deleted
            .push((agent_id.to_string(), provider));
        Ok(())
    }
}

/// Records every text it embeds and returns a fixed vector.
#[derive(Default)]
pub struct CountingEmbedder {
    pub calls: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> ChatResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(text.to_string());
        Ok(vec![0.1, 0.2, 0.3])
    }
}

/// Plays back queued results in order and records each request it sees.
#[derive(Default)]
pub struct ScriptedCompletion {
    script: Mutex<VecDeque<LlmResult<CompletionResult>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
    delay: Duration,
}

impl ScriptedCompletion {
    pub fn new(script: Vec<LlmResult<CompletionResult>>) -> Arc<Self> {
        Self::delayed(script, Duration::ZERO)
    }

    /// Every call waits `delay` before answering.
    pub fn delayed(script: Vec<LlmResult<CompletionResult>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &CompletionRequest) -> LlmResult<CompletionResult> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyOutput))
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn invoke(&self, request: &CompletionRequest) -> LlmResult<CompletionResult> {
        tokio::time::sleep(self.delay).await;
        self.next(request)
    }

    /// Streams the reply word by word before returning it.
    async fn invoke_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn DeltaSink,
    ) -> LlmResult<CompletionResult> {
        tokio::time::sleep(self.delay).await;
        let result = self.next(request)?;
        for word in result.reply_text.split_inclusive(' ') {
            sink.push_delta(word).await;
        }
        Ok(result)
    }
}

/// Provider that panics on any call
pub struct PanickingCompletion;

#[async_trait]
impl CompletionProvider for PanickingCompletion {
    async fn invoke(&self, _request: &CompletionRequest) -> LlmResult<CompletionResult> {
        panic!("completion provider blew up");
    }

    async fn invoke_streaming(
        &self,
        _request: &CompletionRequest,
        _sink: &dyn DeltaSink,
    ) -> LlmResult<CompletionResult> {
        panic!("completion provider blew up");
    }
}

pub fn reply(text: &str) -> LlmResult<CompletionResult> {
    Ok(CompletionResult {
        mode: ReplyMode::Reply,
        reply_text: text.to_string(),
        tool_calls: Vec::new(),
        usage: TokenUsage {
            input_tokens: 120,
            output_tokens: 12,
        },
        output_items: vec![json!({
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "output_text", "text": text }]
        })],
    })
}

/// A primary result asking for one call of `tool` with `arguments`.
pub fn tool_call(tool: &str, arguments: Value) -> LlmResult<CompletionResult> {
    tool_calls(&[(tool, arguments)])
}

/// One primary leg asking for every `(tool, arguments)` pair, in order.
pub fn tool_calls(calls: &[(&str, Value)]) -> LlmResult<CompletionResult> {
    let mut result = CompletionResult {
        mode: ReplyMode::ActionsNeeded,
        reply_text: String::new(),
        tool_calls: Vec::new(),
        usage: TokenUsage {
            input_tokens: 200,
            output_tokens: 20,
        },
        output_items: Vec::new(),
    };
    for (tool, arguments) in calls {
        let call_id = format!("call_{}", tool);
        result.tool_calls.push(ToolCall::new(*tool, arguments.clone(), call_id.clone()));
        result.output_items.push(json!({
            "type": "function_call",
            "name": tool,
            "call_id": call_id,
            "arguments": arguments.to_string()
        }));
    }
    Ok(result)
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Upstream endpoints the dispatcher and token manager talk to
#[derive(Clone)]
pub struct Upstreams {
    pub token_url: String,
    pub gmail_send_url: String,
    pub calendar_api_url: String,
}

impl Default for Upstreams {
    fn default() -> Self {
        Self {
            token_url: "http://127.0.0.1:9/token".to_string(),
            gmail_send_url: "http://127.0.0.1:9/send".to_string(),
            calendar_api_url: "http://127.0.0.1:9/calendar/v3".to_string(),
        }
    }
}

pub fn dispatcher(store: Arc<dyn ContextStore>, upstreams: &Upstreams) -> ActionDispatcher {
    let http = reqwest::Client::new();
    let tokens = TokenManager::new(
        http.clone(),
        store,
        OAuthClientConfig {
            client_id: Some("client-id".to_string().into()),
            client_secret: Some("client-secret".to_string().into()),
            token_url: upstreams.token_url.clone(),
        },
    );
    ActionDispatcher::new(
        http,
        tokens,
        DispatchConfig {
            gmail_send_url: upstreams.gmail_send_url.clone(),
            calendar_api_url: upstreams.calendar_api_url.clone(),
            chat_username: "MitsoLab".to_string(),
        },
    )
}

pub fn orchestrator(
    store: Arc<MemoryStore>,
    embedder: Arc<CountingEmbedder>,
    llm: Arc<dyn CompletionProvider>,
    upstreams: &Upstreams,
) -> Orchestrator {
    let store: Arc<dyn ContextStore> = store;
    Orchestrator::new(
        OrchestratorConfig::default(),
        store.clone(),
        embedder,
        llm,
        dispatcher(store, upstreams),
    )
}

pub const WIDGET_HOST: &str = "app.example.com";

/// The full router over in-memory collaborators.
pub fn app(store: Arc<MemoryStore>, llm: Arc<dyn CompletionProvider>) -> Router {
    app_with_heartbeat(store, llm, Duration::from_secs(15))
}

pub fn app_with_heartbeat(store: Arc<MemoryStore>, llm: Arc<dyn CompletionProvider>, heartbeat: Duration) -> Router {
    let orchestrator = orchestrator(store, Arc::new(CountingEmbedder::default()), llm, &Upstreams::default());
    let state = ChatState {
        orchestrator: Arc::new(orchestrator),
        widget: Arc::new(WidgetPolicy::new(vec![WIDGET_HOST.to_string()], "/widget")),
        heartbeat,
    };
    parley::create_app(state, Arc::new(HealthHandler::new(Arc::new(Settings::default()))))
}
