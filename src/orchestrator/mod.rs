//! The chat turn state machine.
//!
//! ```text
//! AUTH -> QUOTA -> CONTEXT (parallel) -> PRIMARY
//!      -> [DISPATCH -> FOLLOWUP]? -> PERSIST -> ANALYTICS (detached) -> RESPOND
//! ```
//!
//! [`Orchestrator::prepare`] runs every gate up to prompt assembly so that a
//! streaming handler can still answer with a plain HTTP status when a gate
//! fails. [`Orchestrator::complete`] runs the model legs and persistence.
//! Analytics are written only for turns that persisted.

pub mod context;
pub mod prompt;
pub mod timing;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::dispatch::{ActionDispatcher, DispatchOutcome, ToolTiming};
use crate::domain::{
    AnalyticsRecord, Channel, ContextStore, Embedder, RequestContext, TranscriptRecord,
};
use crate::error::{ChatError, ChatResult};
use crate::llm::{
    function_call_output, input_items, CompletionProvider, CompletionRequest, CompletionResult,
    DeltaSink, ReplyMode, TokenUsage,
};

use self::context::{ConversationContext, DEFAULT_SKIP_MESSAGES};
use self::timing::{timed, TimingRecorder};

/// Everything the orchestrator reads from configuration, resolved once.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub primary_model: String,
    pub primary_verbosity: Option<String>,
    pub followup_model: String,
    pub followup_reasoning_effort: Option<String>,
    pub followup_verbosity: Option<String>,
    pub history_rows: usize,
    pub recent_prompts: usize,
    pub skip_messages: HashSet<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4o-mini".to_string(),
            primary_verbosity: Some("medium".to_string()),
            followup_model: "gpt-5-nano".to_string(),
            followup_reasoning_effort: Some("minimal".to_string()),
            followup_verbosity: Some("low".to_string()),
            history_rows: 3,
            recent_prompts: 2,
            skip_messages: DEFAULT_SKIP_MESSAGES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let model = &settings.model;
        let conversation = &settings.conversation;
        let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            primary_model: model.primary_model.clone(),
            primary_verbosity: non_empty(&model.primary_verbosity),
            followup_model: model.followup_model.clone(),
            followup_reasoning_effort: non_empty(&model.followup_reasoning_effort),
            followup_verbosity: non_empty(&model.followup_verbosity),
            history_rows: conversation.history_rows,
            recent_prompts: conversation.recent_prompts,
            skip_messages: conversation
                .skip_messages
                .iter()
                .map(|m| context::normalize_message(m))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }
}

/// A request that passed every gate and is ready for the model
pub struct PreparedTurn {
    ctx: RequestContext,
    context: ConversationContext,
    instructions: String,
    timings: TimingRecorder,
}

impl PreparedTurn {
    pub fn request(&self) -> &RequestContext {
        &self.ctx
    }
}

/// What a finished turn reports back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub anon_id: String,
    pub chat_id: String,
    pub total_ms: u64,
    pub tool_used: bool,
    pub tool_call_count: usize,
    pub model_primary: String,
    pub model_followup: Option<String>,
    pub primary_input_tokens: u64,
    pub primary_output_tokens: u64,
    pub followup_input_tokens: u64,
    pub followup_output_tokens: u64,
    pub steps_ms: BTreeMap<String, u64>,
    pub tool_calls_ms: Vec<ToolTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_button: Option<Value>,
}

/// Model-leg results gathered before persistence
struct Exchange {
    reply: String,
    primary_usage: TokenUsage,
    followup_usage: Option<TokenUsage>,
    dispatch: Option<DispatchOutcome>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn ContextStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn CompletionProvider>,
    dispatcher: ActionDispatcher,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn ContextStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn CompletionProvider>,
        dispatcher: ActionDispatcher,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            llm,
            dispatcher,
        }
    }

    /// Runs a whole turn and returns the buffered outcome.
    pub async fn run(&self, ctx: RequestContext) -> ChatResult<TurnOutcome> {
        let turn = self.prepare(ctx).await?;
        self.complete(turn, None).await
    }

    /// AUTH, QUOTA and CONTEXT, then prompt assembly.
    pub async fn prepare(&self, ctx: RequestContext) -> ChatResult<PreparedTurn> {
        let mut timings = TimingRecorder::start();

        let (auth, auth_ms) = timed(self.authorize(&ctx)).await;
        timings.record(timing::VALIDATE_AGENT_KEY, auth_ms);
        auth?;
        tracing::debug!("auth gate passed");

        let (usage, quota_ms) = timed(self.store.message_usage(&ctx.agent_id)).await;
        timings.record(timing::CHECK_MESSAGE_CAP, quota_ms);
        if usage?.is_exhausted() {
            return Err(ChatError::QuotaExceeded("Message limit reached".to_string()));
        }
        tracing::debug!("quota gate passed");

        let context = context::gather(
            self.store.as_ref(),
            self.embedder.as_ref(),
            &self.config,
            &ctx,
            &mut timings,
        )
        .await?;
        tracing::debug!(
            knowledge_chunks = context.knowledge.len(),
            history_messages = context.history.len(),
            tools = context.catalog.len(),
            "context assembled"
        );

        let (instructions, prompt_ms) = timed(async {
            prompt::primary_instructions(&context.profile, &context.knowledge, Utc::now())
        })
        .await;
        timings.record(timing::PROMPT_BUILD, prompt_ms);

        Ok(PreparedTurn {
            ctx,
            context,
            instructions,
            timings,
        })
    }

    async fn authorize(&self, ctx: &RequestContext) -> ChatResult<()> {
        match ctx.channel {
            Channel::Api => {
                let token = ctx
                    .auth_token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ChatError::Unauthorized("Missing API key".to_string()))?;
                match self.store.agent_api_key(&ctx.agent_id).await? {
                    None => Err(ChatError::Unauthorized("Agent not found".to_string())),
                    Some(stored) if stored == token => Ok(()),
                    Some(_) => Err(ChatError::Unauthorized("Invalid API key".to_string())),
                }
            }
            Channel::Widget => {
                if self.store.widget_enabled(&ctx.agent_id).await? {
                    Ok(())
                } else {
                    Err(ChatError::Forbidden("Widget is not enabled for this agent".to_string()))
                }
            }
        }
    }

    /// PRIMARY, optional DISPATCH and FOLLOWUP, PERSIST, then detached ANALYTICS.
    ///
    /// With a sink, follow-up deltas stream straight into it. Primary deltas
    /// are held back and only forwarded once that leg turns out to be the reply.
    pub async fn complete(&self, turn: PreparedTurn, sink: Option<&dyn DeltaSink>) -> ChatResult<TurnOutcome> {
        let PreparedTurn {
            ctx,
            context,
            instructions,
            mut timings,
        } = turn;

        let exchange = self.exchange(&ctx, &context, instructions, sink, &mut timings).await?;

        let tool_call_count = exchange.dispatch.as_ref().map(|d| d.results.len()).unwrap_or(0);

        let transcript = TranscriptRecord {
            agent_id: ctx.agent_id.clone(),
            workspace_id: context.profile.workspace_id.clone(),
            anon_id: ctx.conversation.anon_id.clone(),
            chat_id: ctx.conversation.chat_id.clone(),
            country: ctx.country_code.clone(),
            prompt: ctx.message.clone(),
            result: exchange.reply.clone(),
            source: ctx.channel.as_str().to_string(),
            action: tool_call_count > 0,
        };
        let (saved, save_ms) = timed(self.store.persist_transcript(&transcript)).await;
        timings.record(timing::SAVE_MESSAGE, save_ms);
        if let Err(err) = saved {
            tracing::warn!(error = %err, "transcript could not be persisted");
            return Err(err);
        }

        let (_, analytics_ms) = timed(async {
            self.spawn_analytics(self.analytics_record(&ctx, &context, &exchange, &timings));
        })
        .await;
        timings.record(timing::SAVE_ANALYTICS_DISPATCH, analytics_ms);

        let followup_usage = exchange.followup_usage.unwrap_or_default();
        let (tool_calls_ms, custom_button) = match exchange.dispatch {
            Some(dispatch) => (dispatch.timings, dispatch.button),
            None => (Vec::new(), None),
        };

        Ok(TurnOutcome {
            reply: exchange.reply,
            anon_id: ctx.conversation.anon_id,
            chat_id: ctx.conversation.chat_id,
            total_ms: timings.total_ms(),
            tool_used: tool_call_count > 0,
            tool_call_count,
            model_primary: self.config.primary_model.clone(),
            model_followup: exchange
                .followup_usage
                .map(|_| self.config.followup_model.clone()),
            primary_input_tokens: exchange.primary_usage.input_tokens,
            primary_output_tokens: exchange.primary_usage.output_tokens,
            followup_input_tokens: followup_usage.input_tokens,
            followup_output_tokens: followup_usage.output_tokens,
            steps_ms: timings.snapshot(),
            tool_calls_ms,
            custom_button,
        })
    }

    async fn invoke(&self, request: &CompletionRequest, sink: Option<&dyn DeltaSink>) -> ChatResult<CompletionResult> {
        let result = match sink {
            Some(sink) => self.llm.invoke_streaming(request, sink).await,
            None => self.llm.invoke(request).await,
        };
        result.map_err(ChatError::from)
    }

    async fn exchange(
        &self,
        ctx: &RequestContext,
        context: &ConversationContext,
        instructions: String,
        sink: Option<&dyn DeltaSink>,
        timings: &mut TimingRecorder,
    ) -> ChatResult<Exchange> {
        let mut messages = context.history.clone();
        messages.push(crate::domain::ChatMessage::user(ctx.message.clone()));
        let input = input_items(&messages);

        let primary_request = CompletionRequest {
            model: self.config.primary_model.clone(),
            instructions,
            input: input.clone(),
            tools: context.catalog.tools().to_vec(),
            reasoning_effort: None,
            verbosity: self.config.primary_verbosity.clone(),
        };
        let held = HeldDeltas::default();
        let primary_sink = sink.map(|_| &held as &dyn DeltaSink);
        let (primary, primary_ms) = timed(self.invoke(&primary_request, primary_sink)).await;
        timings.record(timing::MODEL_PRIMARY, primary_ms);
        let primary = primary?;

        if primary.mode == ReplyMode::Reply {
            if let Some(sink) = sink {
                held.flush_into(sink).await;
            }
            return Ok(Exchange {
                reply: primary.reply_text,
                primary_usage: primary.usage,
                followup_usage: None,
                dispatch: None,
            });
        }

        tracing::debug!(tool_calls = primary.tool_calls.len(), "dispatching actions");
        let dispatch = self
            .dispatcher
            .dispatch_all(&ctx.agent_id, &primary.tool_calls, &context.catalog)
            .await;
        timings.record(timing::TOOL_EXECUTION, dispatch.elapsed_ms);

        let mut followup_input = input;
        followup_input.extend(primary.output_items.iter().cloned());
        followup_input.extend(dispatch.results.iter().map(function_call_output));

        let followup_request = CompletionRequest {
            model: self.config.followup_model.clone(),
            instructions: prompt::followup_instructions(&context.profile, Utc::now(), dispatch.calendar.as_ref()),
            input: followup_input,
            tools: Vec::new(),
            reasoning_effort: self.config.followup_reasoning_effort.clone(),
            verbosity: self.config.followup_verbosity.clone(),
        };
        let (followup, followup_ms) = timed(self.invoke(&followup_request, sink)).await;
        timings.record(timing::MODEL_FOLLOWUP, followup_ms);
        let followup = followup?;

        if followup.reply_text.trim().is_empty() {
            return Err(ChatError::ModelOutput("Empty model output".to_string()));
        }

        Ok(Exchange {
            reply: followup.reply_text,
            primary_usage: primary.usage,
            followup_usage: Some(followup.usage),
            dispatch: Some(dispatch),
        })
    }

    fn analytics_record(
        &self,
        ctx: &RequestContext,
        context: &ConversationContext,
        exchange: &Exchange,
        timings: &TimingRecorder,
    ) -> AnalyticsRecord {
        let primary = exchange.primary_usage;
        let followup = exchange.followup_usage;
        let action_count = exchange.dispatch.as_ref().map(|d| d.results.len()).unwrap_or(0);
        AnalyticsRecord {
            agent_id: ctx.agent_id.clone(),
            workspace_id: context.profile.workspace_id.clone(),
            endpoint: ctx.channel.as_str().to_string(),
            source: ctx.channel.as_str().to_string(),
            country: ctx.country_code.clone(),
            anon_id: ctx.conversation.anon_id.clone(),
            chat_id: ctx.conversation.chat_id.clone(),
            model_primary: self.config.primary_model.clone(),
            model_followup: followup.map(|_| self.config.followup_model.clone()),
            primary_input_tokens: primary.input_tokens,
            primary_output_tokens: primary.output_tokens,
            followup_input_tokens: followup.map(|u| u.input_tokens).unwrap_or(0),
            followup_output_tokens: followup.map(|u| u.output_tokens).unwrap_or(0),
            action_used: action_count > 0,
            action_count,
            rag_used: context.rag_used,
            rag_chunk_count: context.knowledge.len(),
            status_code: 200,
            latency_total_ms: timings.total_ms(),
            latency_primary_ms: timings.get(timing::MODEL_PRIMARY),
            latency_followup_ms: timings.get(timing::MODEL_FOLLOWUP),
            latency_tools_ms: timings.get(timing::TOOL_EXECUTION),
        }
    }

    /// Analytics never hold up or fail the response.
    fn spawn_analytics(&self, record: AnalyticsRecord) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.persist_analytics(&record).await {
                tracing::warn!(error = %e, agent_id = %record.agent_id, "analytics write failed");
            }
        });
    }
}

/// Primary-leg deltas, kept until the leg is known to end in a reply
#[derive(Default)]
struct HeldDeltas {
    deltas: Mutex<Vec<String>>,
}

impl HeldDeltas {
    async fn flush_into(&self, sink: &dyn DeltaSink) {
        let deltas = std::mem::take(&mut *self.deltas.lock().await);
        for delta in &deltas {
            sink.push_delta(delta).await;
        }
    }
}

#[async_trait]
impl DeltaSink for HeldDeltas {
    async fn push_delta(&self, text: &str) {
        self.deltas.lock().await.push(text.to_string());
    }
}
