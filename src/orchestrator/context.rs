//! Concurrent context assembly: knowledge, history, profile and tool catalog

use std::collections::HashSet;

use crate::catalog::{build_catalog, ActionCatalog};
use crate::domain::{AgentProfile, ChatMessage, ContextStore, Embedder, RequestContext};
use crate::error::ChatResult;

use super::timing::{self, timed, TimingRecorder};
use super::OrchestratorConfig;

/// Greetings and acknowledgements that never warrant a knowledge search
pub const DEFAULT_SKIP_MESSAGES: &[&str] = &[
    "hi", "hello", "hey", "yo", "hiya", "good morning", "good afternoon", "good evening",
    "thanks", "thank you", "thx", "ty", "ok", "okay", "k", "cool", "great", "nice",
    "yes", "no", "yep", "nope", "sure", "bye", "goodbye",
];

const EDGE_PUNCTUATION: &[char] = &['"', '\'', '`', '.', ',', '!', '?', '(', ')', '{', '}', '[', ']', '<', '>', '-'];

#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub knowledge: Vec<String>,
    pub rag_used: bool,
    pub history: Vec<ChatMessage>,
    pub profile: AgentProfile,
    pub catalog: ActionCatalog,
}

/// Lowercased message with edge punctuation stripped and whitespace collapsed.
pub fn normalize_message(message: &str) -> String {
    let lowered = message.trim().to_lowercase();
    let stripped = lowered.trim_matches(|c: char| c.is_whitespace() || EDGE_PUNCTUATION.contains(&c));
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn should_skip_retrieval(message: &str, skip: &HashSet<String>) -> bool {
    let normalized = normalize_message(message);
    normalized.is_empty() || skip.contains(&normalized)
}

struct Retrieval {
    chunks: Vec<String>,
    used: bool,
    prompts_ms: u64,
    embedding_ms: u64,
    search_ms: u64,
}

async fn retrieve_knowledge(
    store: &dyn ContextStore,
    embedder: &dyn Embedder,
    config: &OrchestratorConfig,
    ctx: &RequestContext,
) -> ChatResult<Retrieval> {
    if should_skip_retrieval(&ctx.message, &config.skip_messages) {
        tracing::debug!("skipping knowledge retrieval for low-signal message");
        return Ok(Retrieval {
            chunks: Vec::new(),
            used: false,
            prompts_ms: 0,
            embedding_ms: 0,
            search_ms: 0,
        });
    }

    let (prompts, prompts_ms) = timed(store.recent_prompts(
        &ctx.agent_id,
        &ctx.conversation,
        config.recent_prompts,
    ))
    .await;
    let mut query: Vec<String> = prompts?;
    query.reverse();
    query.push(ctx.message.clone());

    let (embedding, embedding_ms) = timed(embedder.embed(&query.join("\n"))).await;
    let embedding = embedding?;

    let (chunks, search_ms) = timed(store.search_knowledge(&ctx.agent_id, &embedding)).await;
    let chunks = chunks?;

    Ok(Retrieval {
        used: !chunks.is_empty(),
        chunks,
        prompts_ms,
        embedding_ms,
        search_ms,
    })
}

async fn load_history(
    store: &dyn ContextStore,
    config: &OrchestratorConfig,
    ctx: &RequestContext,
) -> ChatResult<Vec<ChatMessage>> {
    let rows = store
        .recent_history(&ctx.agent_id, &ctx.conversation, config.history_rows)
        .await?;
    Ok(rows.into_iter().rev().flat_map(|row| row.into_messages()).collect())
}

async fn load_catalog(store: &dyn ContextStore, ctx: &RequestContext) -> ChatResult<ActionCatalog> {
    let rows = store.integration_rows(&ctx.agent_id).await?;
    Ok(build_catalog(&rows))
}

/// Runs the four lookups concurrently. The first failure, in a fixed order,
/// aborts the request with that collaborator's status.
pub async fn gather(
    store: &dyn ContextStore,
    embedder: &dyn Embedder,
    config: &OrchestratorConfig,
    ctx: &RequestContext,
    timings: &mut TimingRecorder,
) -> ChatResult<ConversationContext> {
    let (retrieval, (history, history_ms), (profile, profile_ms), (catalog, catalog_ms)) = tokio::join!(
        retrieve_knowledge(store, embedder, config, ctx),
        timed(load_history(store, config, ctx)),
        timed(store.agent_profile(&ctx.agent_id)),
        timed(load_catalog(store, ctx)),
    );

    timings.record(timing::HISTORY_FETCH, history_ms);
    timings.record(timing::AGENT_INFO_FETCH, profile_ms);
    timings.record(timing::ACTIONS_FETCH, catalog_ms);

    let retrieval = retrieval?;
    timings.record(timing::RAG_RECENT_PROMPTS, retrieval.prompts_ms);
    timings.record(timing::RAG_EMBEDDING, retrieval.embedding_ms);
    timings.record(timing::RAG_VECTOR_SEARCH, retrieval.search_ms);

    Ok(ConversationContext {
        knowledge: retrieval.chunks,
        rag_used: retrieval.used,
        history: history?,
        profile: profile?,
        catalog: catalog?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skip_set() -> HashSet<String> {
        DEFAULT_SKIP_MESSAGES.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_message() {
        assert_eq!(normalize_message("  Hello!!  "), "hello");
        assert_eq!(normalize_message("\"Thank   you.\""), "thank you");
        assert_eq!(normalize_message("(ok)"), "ok");
        assert_eq!(normalize_message("What are your   hours?"), "what are your hours");
        assert_eq!(normalize_message("?!"), "");
    }

    #[test]
    fn test_should_skip_retrieval() {
        let skip = skip_set();
        assert!(should_skip_retrieval("Hi", &skip));
        assert!(should_skip_retrieval("thanks!", &skip));
        assert!(should_skip_retrieval("...", &skip));
        assert!(!should_skip_retrieval("Do you have parking?", &skip));
    }
}
