//! Executes the tool calls a completion asked for.
//!
//! Calls run strictly in order. Every call produces an [`ActionResult`],
//! including unknown actions and failed integrations, so the follow-up
//! completion always sees one output per call.

mod calendar;
mod email;
mod http;

pub use calendar::{DURATION_SHRINK_FACTOR, OPEN_HOURS_BUFFER_MINUTES};
pub use email::build_mime_message;

use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::catalog::ActionCatalog;
use crate::domain::{
    ActionKind, ActionResponse, ActionResult, CalendarSettings, OAuthProvider, RequestSnapshot,
    ToolCall,
};
use crate::error::ChatError;
use crate::oauth::{AccessToken, TokenManager};

/// Endpoints and defaults the dispatcher needs; built once from settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub gmail_send_url: String,
    pub calendar_api_url: String,
    pub chat_username: String,
}

/// Per-call latency breakdown
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolTiming {
    pub action_key: String,
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_availability_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_request_ms: Option<u64>,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub results: Vec<ActionResult>,
    pub timings: Vec<ToolTiming>,
    /// Settings of the first calendar action that ran
    pub calendar: Option<CalendarSettings>,
    /// Payload of the first button action that ran
    pub button: Option<Value>,
    pub elapsed_ms: u64,
}

pub struct ActionDispatcher {
    http: reqwest::Client,
    tokens: TokenManager,
    config: DispatchConfig,
}

impl ActionDispatcher {
    pub fn new(http: reqwest::Client, tokens: TokenManager, config: DispatchConfig) -> Self {
        Self { http, tokens, config }
    }

    pub async fn dispatch_all(&self, agent_id: &str, calls: &[ToolCall], catalog: &ActionCatalog) -> DispatchOutcome {
        let started = Instant::now();
        let mut outcome = DispatchOutcome::default();

        for call in calls {
            let (result, timing) = self.dispatch(agent_id, call, catalog).await;
            tracing::debug!(
                action_key = %call.action_key,
                status = result.response.status,
                ok = result.response.ok,
                "action dispatched"
            );

            if let Some(action) = catalog.resolve(&call.action_key) {
                if outcome.calendar.is_none() {
                    outcome.calendar = action.kind.calendar().cloned();
                }
                if outcome.button.is_none() && result.response.ok {
                    if let ActionKind::EphemeralButton { payload } = &action.kind {
                        outcome.button = Some(payload.clone());
                    }
                }
            }

            outcome.results.push(result);
            outcome.timings.push(timing);
        }

        outcome.elapsed_ms = elapsed_ms(started);
        outcome
    }

    pub async fn dispatch(&self, agent_id: &str, call: &ToolCall, catalog: &ActionCatalog) -> (ActionResult, ToolTiming) {
        let started = Instant::now();
        let mut timing = ToolTiming {
            action_key: call.action_key.clone(),
            call_id: call.call_id.clone(),
            ..Default::default()
        };

        let Some(action) = catalog.resolve(&call.action_key) else {
            tracing::warn!(action_key = %call.action_key, "model called an unknown action");
            timing.total_ms = elapsed_ms(started);
            return (ActionResult::unknown(call), timing);
        };

        let (request, response) = match &action.kind {
            ActionKind::EphemeralButton { payload } => (None, ActionResponse::success(200, payload.clone())),

            ActionKind::GenericHttp(target) | ActionKind::WebhookRelay { target, .. } => {
                if target.url.trim().is_empty() {
                    timing.total_ms = elapsed_ms(started);
                    return (ActionResult::unknown(call), timing);
                }
                let (request, response) = http::execute(&self.http, target, &call.variables, &mut timing).await;
                (Some(request), response)
            }

            ActionKind::ChatWebhook { url, username } => {
                if url.trim().is_empty() {
                    timing.total_ms = elapsed_ms(started);
                    return (ActionResult::unknown(call), timing);
                }
                let username = username.as_deref().unwrap_or(&self.config.chat_username);
                let (request, response) =
                    http::execute_chat(&self.http, url, username, &call.variables, &mut timing).await;
                (Some(request), response)
            }

            ActionKind::EmailSend { connection } => {
                let token_started = Instant::now();
                let token = self
                    .tokens
                    .ensure_access_token(agent_id, OAuthProvider::Gmail, connection)
                    .await;
                timing.token_ms = Some(elapsed_ms(token_started));
                let intended = email::snapshot(&self.config.gmail_send_url, token.as_ref().ok(), &call.variables);
                match token {
                    Ok(token) => {
                        let response = email::send(&self.http, &intended, &token, &call.variables, &mut timing).await;
                        (Some(intended), response)
                    }
                    Err(e) => (Some(intended), ActionResponse::from_error(&e)),
                }
            }

            ActionKind::CalendarCreate { connection, calendar: settings }
            | ActionKind::CalendarList { connection, calendar: settings } => {
                let events_url = calendar::events_url(&self.config.calendar_api_url, &settings.calendar_id);
                let is_create = matches!(action.kind, ActionKind::CalendarCreate { .. });

                let token_started = Instant::now();
                let token = self
                    .tokens
                    .ensure_access_token(agent_id, OAuthProvider::Calendar, connection)
                    .await;
                timing.token_ms = Some(elapsed_ms(token_started));

                let intended = if is_create {
                    calendar::create_snapshot(&events_url, token.as_ref().ok(), &call.variables)
                } else {
                    calendar::list_snapshot(&events_url, token.as_ref().ok(), &call.variables)
                };

                match token {
                    Err(e) => (Some(intended), ActionResponse::from_error(&e)),
                    Ok(token) if is_create => {
                        let (request, response) = calendar::create_event(
                            &self.http,
                            &events_url,
                            &token,
                            settings,
                            &call.variables,
                            intended,
                            &mut timing,
                        )
                        .await;
                        (Some(request), response)
                    }
                    Ok(token) => {
                        let (request, response) = calendar::list_events(
                            &self.http,
                            &events_url,
                            &token,
                            settings,
                            &call.variables,
                            intended,
                            &mut timing,
                        )
                        .await;
                        (Some(request), response)
                    }
                }
            }
        };

        timing.total_ms = elapsed_ms(started);
        let result = ActionResult {
            call_id: call.call_id.clone(),
            action_key: call.action_key.clone(),
            request,
            response,
        };
        (result, timing)
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Snapshot of an outbound request, headers exactly as sent.
fn snapshot(method: &str, url: &str, headers: &[(String, String)], body: Value) -> RequestSnapshot {
    let headers: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    RequestSnapshot {
        method: method.to_string(),
        url: url.to_string(),
        headers,
        body,
    }
}

/// Headers an OAuth leg sends; nothing when no token could be obtained.
fn bearer_headers(token: Option<&AccessToken>) -> Vec<(String, String)> {
    token
        .map(|token| vec![("Authorization".to_string(), token.authorization())])
        .unwrap_or_default()
}

/// Appends query pairs, respecting a query string already on the URL.
fn append_query(url: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return url.to_string();
    }
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}

/// Reads an integration's answer. Bodies that are not JSON are kept as text.
async fn read_response(response: reqwest::Response) -> ActionResponse {
    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "could not read action response body");
            return ActionResponse::from_error(&ChatError::Upstream("Action request failed".to_string()));
        }
    };
    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    if status.is_success() {
        ActionResponse::success(status.as_u16(), body)
    } else {
        ActionResponse::rejected(status.as_u16(), body)
    }
}

fn variable_str<'a>(variables: &'a Value, key: &str) -> Option<&'a str> {
    variables
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
