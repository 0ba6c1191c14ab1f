//! HTTP entry points for the API and widget channels.
//!
//! Both channels share request parsing and the respond path; they differ in
//! who may call them and how CORS is answered.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::Instrument;

use crate::adapters::relay;
use crate::domain::{Channel, ConversationId, RequestContext};
use crate::error::ChatError;
use crate::orchestrator::Orchestrator;

const COUNTRY_HEADERS: &[&str] = &["x-vercel-ip-country", "cf-ipcountry", "x-country-code"];
const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";

#[derive(Clone)]
pub struct ChatState {
    pub orchestrator: Arc<Orchestrator>,
    pub widget: Arc<WidgetPolicy>,
    pub heartbeat: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentQuery {
    pub agent_id: Option<String>,
}

/// Which browser callers may use the widget channel
#[derive(Debug, Clone)]
pub struct WidgetPolicy {
    allowed_hosts: Vec<String>,
    referer_path_prefix: String,
}

/// Host and path of a header carrying a URL; unparsable values yield nothing.
fn header_url(headers: &HeaderMap, name: header::HeaderName) -> Option<(String, String)> {
    let raw = headers.get(name)?.to_str().ok()?;
    let url = reqwest::Url::parse(raw).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some((host, url.path().to_string()))
}

impl WidgetPolicy {
    pub fn new(allowed_hosts: Vec<String>, referer_path_prefix: impl Into<String>) -> Self {
        Self {
            allowed_hosts,
            referer_path_prefix: referer_path_prefix.into(),
        }
    }

    fn is_allowed_host(&self, host: &str) -> bool {
        self.allowed_hosts.iter().any(|h| h == host)
    }

    pub fn allows_origin(&self, headers: &HeaderMap) -> bool {
        header_url(headers, header::ORIGIN).is_some_and(|(host, _)| self.is_allowed_host(&host))
    }

    /// An allowed origin, or a referer on an allowed host under the widget path.
    pub fn allows_caller(&self, headers: &HeaderMap) -> bool {
        self.allows_origin(headers)
            || header_url(headers, header::REFERER).is_some_and(|(host, path)| {
                self.is_allowed_host(&host) && path.starts_with(&self.referer_path_prefix)
            })
    }

    fn cors_headers(&self, headers: &HeaderMap) -> HeaderMap {
        let mut cors = HeaderMap::new();
        if self.allows_origin(headers) {
            if let Some(origin) = headers.get(header::ORIGIN) {
                cors.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
                cors.insert(header::VARY, HeaderValue::from_static("Origin"));
            }
        }
        cors.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
        cors.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
        cors
    }
}

fn api_cors_headers() -> HeaderMap {
    let mut cors = HeaderMap::new();
    cors.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    cors.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    cors.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    cors
}

fn with_headers(mut response: Response, headers: HeaderMap) -> Response {
    response.headers_mut().extend(headers);
    response
}

/// Request body fields; ids may arrive as strings or numbers
#[derive(Debug, Default)]
struct ChatBody {
    agent_id: Option<String>,
    message: Option<String>,
    anon_id: Option<String>,
    chat_id: Option<String>,
    stream: Option<bool>,
}

fn normalize_id(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

impl ChatBody {
    /// An empty or malformed body reads as a body with no fields.
    fn parse(bytes: &Bytes) -> Self {
        let value: Value = serde_json::from_slice(bytes).unwrap_or(Value::Null);
        let message = match value.get("message") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self {
            agent_id: normalize_id(value.get("agent_id")),
            message,
            anon_id: normalize_id(value.get("anon_id")),
            chat_id: normalize_id(value.get("chat_id")),
            stream: value.get("stream").and_then(Value::as_bool),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn country_code(headers: &HeaderMap) -> Option<String> {
    COUNTRY_HEADERS.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?.trim().to_uppercase();
        (!value.is_empty()).then_some(value)
    })
}

/// An explicit `stream` flag wins; otherwise the Accept header decides.
fn wants_stream(body: &ChatBody, headers: &HeaderMap) -> bool {
    body.stream.unwrap_or_else(|| {
        headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/event-stream"))
    })
}

fn resolve_agent_id(path: Option<String>, query: AgentQuery, body: &ChatBody) -> Option<String> {
    path.or(query.agent_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .or_else(|| body.agent_id.clone())
}

async fn respond(state: ChatState, ctx: RequestContext) -> Response {
    let span = tracing::info_span!(
        "chat",
        request_id = %ctx.request_id,
        agent_id = %ctx.agent_id,
        channel = ctx.channel.as_str(),
    );

    async move {
        if ctx.wants_stream {
            match state.orchestrator.prepare(ctx).await {
                Ok(turn) => {
                    relay::stream_turn(state.orchestrator.clone(), turn, state.heartbeat).into_response()
                }
                Err(err) => err.into_response(),
            }
        } else {
            match state.orchestrator.run(ctx).await {
                Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
                Err(err) => err.into_response(),
            }
        }
    }
    .instrument(span)
    .await
}

async fn api_chat_inner(
    state: ChatState,
    path_agent: Option<String>,
    query: AgentQuery,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let body = ChatBody::parse(&bytes);
    let token = bearer_token(&headers);
    let agent_id = resolve_agent_id(path_agent, query, &body);

    let mut missing = Vec::new();
    if token.is_none() {
        missing.push("authorization".to_string());
    }
    if agent_id.is_none() {
        missing.push("agent_id".to_string());
    }
    if body.message.is_none() {
        missing.push("message".to_string());
    }
    let (Some(agent_id), Some(message), true) = (agent_id, body.message.clone(), missing.is_empty()) else {
        return ChatError::MissingFields(missing).into_response();
    };

    let ctx = RequestContext::new(Channel::Api, agent_id, message)
        .with_conversation(ConversationId::resolve(body.anon_id.clone(), body.chat_id.clone()))
        .with_auth_token(token)
        .with_country_code(country_code(&headers))
        .with_stream(wants_stream(&body, &headers));

    respond(state, ctx).await
}

pub async fn api_chat(
    State(state): State<ChatState>,
    Query(query): Query<AgentQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    with_headers(api_chat_inner(state, None, query, headers, bytes).await, api_cors_headers())
}

pub async fn api_chat_for_agent(
    State(state): State<ChatState>,
    Path(agent_id): Path<String>,
    Query(query): Query<AgentQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    with_headers(
        api_chat_inner(state, Some(agent_id), query, headers, bytes).await,
        api_cors_headers(),
    )
}

pub async fn api_preflight() -> Response {
    with_headers(StatusCode::NO_CONTENT.into_response(), api_cors_headers())
}

async fn widget_chat_inner(
    state: ChatState,
    path_agent: Option<String>,
    query: AgentQuery,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let body = ChatBody::parse(&bytes);
    let agent_id = path_agent
        .or(query.agent_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    let mut missing = Vec::new();
    if agent_id.is_none() {
        missing.push("agent_id (path)".to_string());
    }
    if body.message.is_none() {
        missing.push("message".to_string());
    }
    if body.anon_id.is_none() {
        missing.push("anon_id".to_string());
    }
    if body.chat_id.is_none() {
        missing.push("chat_id".to_string());
    }
    let (Some(agent_id), Some(message), true) = (agent_id, body.message.clone(), missing.is_empty()) else {
        return ChatError::MissingFields(missing).into_response();
    };

    if !state.widget.allows_caller(&headers) {
        tracing::info!(agent_id = %agent_id, "widget call from a disallowed origin");
        return ChatError::Forbidden("Forbidden origin".to_string()).into_response();
    }

    let ctx = RequestContext::new(Channel::Widget, agent_id, message)
        .with_conversation(ConversationId::resolve(body.anon_id.clone(), body.chat_id.clone()))
        .with_country_code(country_code(&headers))
        .with_stream(wants_stream(&body, &headers));

    respond(state, ctx).await
}

pub async fn widget_chat(
    State(state): State<ChatState>,
    Query(query): Query<AgentQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let cors = state.widget.cors_headers(&headers);
    with_headers(widget_chat_inner(state, None, query, headers, bytes).await, cors)
}

pub async fn widget_chat_for_agent(
    State(state): State<ChatState>,
    Path(agent_id): Path<String>,
    Query(query): Query<AgentQuery>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let cors = state.widget.cors_headers(&headers);
    with_headers(
        widget_chat_inner(state, Some(agent_id), query, headers, bytes).await,
        cors,
    )
}

pub async fn widget_preflight(State(state): State<ChatState>, headers: HeaderMap) -> Response {
    let cors = state.widget.cors_headers(&headers);
    let response = if state.widget.allows_origin(&headers) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        ChatError::Forbidden("Forbidden origin".to_string()).into_response()
    };
    with_headers(response, cors)
}

pub async fn method_not_allowed() -> Response {
    ChatError::MethodNotAllowed.into_response()
}

/// Last-resort answer for a handler that panicked.
pub fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("chat handler panicked");
    ChatError::Internal("handler panicked".to_string()).into_response()
}
