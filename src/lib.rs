//! # Parley - Conversational Action Orchestrator
//!
//! Parley answers chat messages on behalf of an agent. Each turn assembles
//! context (knowledge, history, profile, actions), asks a completion model
//! for a reply or for tool calls, runs those calls against the agent's
//! integrations and relays the final answer as JSON or server-sent events.
//!
//! ## Architecture
//!
//! Parley follows Hexagonal Architecture:
//! - **Domain**: request, action and record types plus the `ContextStore` and `Embedder` ports
//! - **Core**: catalog builder, time normalizer, OAuth token manager, completion
//!   client, action dispatcher and the orchestrator state machine
//! - **Adapters**: axum handlers, SSE relay, PostgREST store, embeddings client
//! - **Config**: configuration loading and validation

pub mod adapters;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod llm;
pub mod oauth;
pub mod orchestrator;
pub mod timezone;

use crate::adapters::chat_handler::{self, ChatState, WidgetPolicy};
use crate::adapters::embeddings::EmbeddingsClient;
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::rest_store::RestStore;
use crate::config::Settings;
use crate::dispatch::ActionDispatcher;
use crate::domain::ContextStore;
use crate::llm::ResponsesClient;
use crate::oauth::TokenManager;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;

/// Wires the production collaborators described by `settings`.
pub fn build_state(settings: &Settings) -> anyhow::Result<ChatState> {
    let http = reqwest::Client::builder().build()?;
    let timeout = Duration::from_secs(settings.model.timeout_seconds);

    let store: Arc<dyn ContextStore> = Arc::new(RestStore::new(
        http.clone(),
        settings.store.url.clone(),
        settings.store_service_key(),
    ));
    let embedder = Arc::new(EmbeddingsClient::new(
        http.clone(),
        settings.model_api_key(),
        settings.model.base_url.clone(),
        settings.model.embedding_model.clone(),
        timeout,
    ));
    let llm = Arc::new(ResponsesClient::new(
        http.clone(),
        settings.model_api_key(),
        settings.model.base_url.clone(),
        timeout,
    ));
    let tokens = TokenManager::new(http.clone(), store.clone(), settings.oauth_client());
    let dispatcher = ActionDispatcher::new(http, tokens, settings.dispatch());

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_settings(settings),
        store,
        embedder,
        llm,
        dispatcher,
    );

    Ok(ChatState {
        orchestrator: Arc::new(orchestrator),
        widget: Arc::new(WidgetPolicy::new(
            settings.widget_hosts(),
            settings.widget.referer_path_prefix.clone(),
        )),
        heartbeat: Duration::from_secs(settings.stream.heartbeat_seconds),
    })
}

/// Creates the Axum application router with all endpoints configured.
///
/// Chat routes answer CORS themselves: the API channel allows any origin,
/// the widget channel only its configured hosts.
pub fn create_app(state: ChatState, health_handler: Arc<HealthHandler>) -> Router {
    let health_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any),
        );

    let chat_router = Router::new()
        .route(
            "/v1/chat",
            post(chat_handler::api_chat)
                .options(chat_handler::api_preflight)
                .fallback(chat_handler::method_not_allowed),
        )
        .route(
            "/v1/chat/:agent_id",
            post(chat_handler::api_chat_for_agent)
                .options(chat_handler::api_preflight)
                .fallback(chat_handler::method_not_allowed),
        )
        .route(
            "/v1/widget",
            post(chat_handler::widget_chat)
                .options(chat_handler::widget_preflight)
                .fallback(chat_handler::method_not_allowed),
        )
        .route(
            "/v1/widget/:agent_id",
            post(chat_handler::widget_chat_for_agent)
                .options(chat_handler::widget_preflight)
                .fallback(chat_handler::method_not_allowed),
        )
        .with_state(state);

    health_router
        .merge(chat_router)
        .layer(tower_http::catch_panic::CatchPanicLayer::custom(chat_handler::panic_response))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
