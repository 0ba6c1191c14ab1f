mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::*;
use parley::domain::integration::{ButtonRow, CalendarSettingsRow, HttpActionRow};
use parley::domain::{
    Channel, ConversationId, HistoryRow, OAuthConnection, OAuthProvider, QuotaUsage, RequestContext,
};
use parley::error::ChatError;
use serde_json::{json, Value};

fn api_request(message: &str) -> RequestContext {
    RequestContext::new(Channel::Api, AGENT, message)
        .with_conversation(ConversationId::resolve(Some("anon_1".into()), Some("chat_1".into())))
        .with_auth_token(Some(API_KEY.to_string()))
        .with_country_code(Some("DE".to_string()))
}

/// Text of every message item in a request input, in order.
fn input_texts(input: &[Value]) -> Vec<String> {
    input
        .iter()
        .filter(|item| item["type"] == "message")
        .filter_map(|item| item["content"][0]["text"].as_str().map(str::to_string))
        .collect()
}

fn function_outputs(input: &[Value]) -> Vec<Value> {
    input
        .iter()
        .filter(|item| item["type"] == "function_call_output")
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_greeting_skips_knowledge_search() {
    let store = MemoryStore::with_agent();
    let embedder = Arc::new(CountingEmbedder::default());
    let llm = ScriptedCompletion::new(vec![reply("Hello! How can I help?")]);
    let orchestrator = orchestrator(store.clone(), embedder.clone(), llm.clone(), &Upstreams::default());

    let outcome = orchestrator.run(api_request("Hi!")).await.unwrap();

    assert_eq!(outcome.reply, "Hello! How can I help?");
    assert_eq!(embedder.calls(), 0);
    assert_eq!(store.state.lock().unwrap().searches, 0);
    assert!(!outcome.tool_used);
    assert_eq!(outcome.model_followup, None);

    let transcripts = store.transcripts();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0].prompt, "Hi!");
    assert_eq!(transcripts[0].result, "Hello! How can I help?");
    assert_eq!(transcripts[0].source, "api");
    assert_eq!(transcripts[0].country.as_deref(), Some("DE"));
    assert!(!transcripts[0].action);

    let analytics = store.wait_for_analytics().await;
    assert_eq!(analytics.len(), 1);
    assert!(!analytics[0].rag_used);
    assert_eq!(analytics[0].status_code, 200);
    assert_eq!(analytics[0].primary_input_tokens, 120);
}

#[tokio::test]
async fn test_knowledge_query_includes_recent_prompts() {
    let store = MemoryStore::with_agent();
    store.update(|s| {
        s.prompts = vec!["And on Sundays?".into(), "When do you open?".into()];
        s.knowledge = vec!["We open at 9.".into(), "Parking is free.".into()];
    });
    let embedder = Arc::new(CountingEmbedder::default());
    let llm = ScriptedCompletion::new(vec![reply("Yes, parking is free.")]);
    let orchestrator = orchestrator(store.clone(), embedder.clone(), llm.clone(), &Upstreams::default());

    orchestrator.run(api_request("Do you have parking?")).await.unwrap();

    let texts = embedder.texts.lock().unwrap().clone();
    assert_eq!(texts, vec!["When do you open?\nAnd on Sundays?\nDo you have parking?"]);

    let requests = llm.requests();
    assert!(requests[0]
        .instructions
        .contains("KNOWLEDGE CHUNKS\nWe open at 9.\nParking is free."));

    let analytics = store.wait_for_analytics().await;
    assert!(analytics[0].rag_used);
    assert_eq!(analytics[0].rag_chunk_count, 2);
}

#[tokio::test]
async fn test_history_is_replayed_oldest_first() {
    let store = MemoryStore::with_agent();
    store.update(|s| {
        s.history = vec![
            HistoryRow { prompt: "second question".into(), result: "second answer".into() },
            HistoryRow { prompt: "first question".into(), result: "first answer".into() },
        ];
    });
    let llm = ScriptedCompletion::new(vec![reply("Sure.")]);
    let orchestrator = orchestrator(store, Arc::new(CountingEmbedder::default()), llm.clone(), &Upstreams::default());

    orchestrator.run(api_request("ok")).await.unwrap();

    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        input_texts(&requests[0].input),
        vec!["first question", "first answer", "second question", "second answer", "ok"]
    );
    assert_eq!(requests[0].input[1]["role"], "assistant");
    assert_eq!(requests[0].model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_button_action_round_trip() {
    let store = MemoryStore::with_agent();
    store.update(|s| {
        s.rows.buttons = vec![ButtonRow {
            id: 7,
            label: Some("Book now".into()),
            description: None,
            url: Some("https://book.example.com".into()),
        }];
    });
    let llm = ScriptedCompletion::new(vec![
        tool_call("book_now", json!({})),
        reply("Tap the button below to book."),
    ]);
    let orchestrator = orchestrator(store.clone(), Arc::new(CountingEmbedder::default()), llm.clone(), &Upstreams::default());

    let outcome = orchestrator.run(api_request("I want to book")).await.unwrap();

    assert_eq!(outcome.reply, "Tap the button below to book.");
    assert!(outcome.tool_used);
    assert_eq!(outcome.tool_call_count, 1);
    assert_eq!(outcome.model_followup.as_deref(), Some("gpt-5-nano"));
    assert_eq!(
        outcome.custom_button,
        Some(json!({ "id": 7, "label": "Book now", "url": "https://book.example.com" }))
    );
    assert_eq!(outcome.tool_calls_ms.len(), 1);
    assert_eq!(outcome.tool_calls_ms[0].action_key, "book_now");

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "book_now");

    let followup = &requests[1];
    assert!(followup.tools.is_empty());
    assert_eq!(followup.model, "gpt-5-nano");
    assert_eq!(followup.reasoning_effort.as_deref(), Some("minimal"));
    assert!(followup.input.iter().any(|item| item["type"] == "function_call"));
    let outputs = function_outputs(&followup.input);
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0]["call_id"], "call_book_now");

    assert!(store.transcripts()[0].action);
    let analytics = store.wait_for_analytics().await;
    assert_eq!(analytics[0].action_count, 1);
    assert_eq!(analytics[0].model_followup.as_deref(), Some("gpt-5-nano"));
}

#[tokio::test]
async fn test_get_action_sends_variables_as_query() {
    let seen: Arc<Mutex<Option<HashMap<String, String>>>> = Arc::default();
    let router = Router::new().route(
        "/orders",
        get({
            let seen = seen.clone();
            move |Query(query): Query<HashMap<String, String>>| {
                let seen = seen.clone();
                async move {
                    *seen.lock().unwrap() = Some(query);
                    Json(json!({ "state": "shipped" }))
                }
            }
        }),
    );
    let base = spawn_upstream(router).await;

    let store = MemoryStore::with_agent();
    store.update(|s| {
        s.rows.custom_actions = vec![HttpActionRow {
            id: 3,
            title: Some("Check order".into()),
            url: Some(format!("{}/orders", base)),
            method: Some("get".into()),
            ..Default::default()
        }];
    });
    let llm = ScriptedCompletion::new(vec![
        tool_call("check_order", json!({ "order_id": "A1", "qty": 2 })),
        reply("Your order has shipped."),
    ]);
    let orchestrator = orchestrator(store, Arc::new(CountingEmbedder::default()), llm.clone(), &Upstreams::default());

    let outcome = orchestrator.run(api_request("Where is order A1?")).await.unwrap();
    assert_eq!(outcome.reply, "Your order has shipped.");

    let query = seen.lock().unwrap().clone().unwrap();
    assert_eq!(query.get("order_id").map(String::as_str), Some("A1"));
    assert_eq!(query.get("qty").map(String::as_str), Some("2"));

    let outputs = function_outputs(&llm.requests()[1].input);
    let result: Value = serde_json::from_str(outputs[0]["output"].as_str().unwrap()).unwrap();
    assert_eq!(result["response"]["status"], 200);
    assert_eq!(result["response"]["body"]["state"], "shipped");
    assert_eq!(result["request"]["method"], "GET");
}

#[tokio::test]
async fn test_unknown_tool_still_gets_an_output() {
    let store = MemoryStore::with_agent();
    let llm = ScriptedCompletion::new(vec![
        tool_call("launch_rocket", json!({})),
        reply("I can't do that."),
    ]);
    let orchestrator = orchestrator(store, Arc::new(CountingEmbedder::default()), llm.clone(), &Upstreams::default());

    let outcome = orchestrator.run(api_request("launch it")).await.unwrap();
    assert_eq!(outcome.reply, "I can't do that.");

    let outputs = function_outputs(&llm.requests()[1].input);
    let result: Value = serde_json::from_str(outputs[0]["output"].as_str().unwrap()).unwrap();
    assert_eq!(result["response"]["ok"], false);
    assert_eq!(result["response"]["status"], 400);
}

#[tokio::test]
async fn test_unknown_call_does_not_stop_later_calls() {
    let store = MemoryStore::with_agent();
    store.update(|s| {
        s.rows.buttons = vec![ButtonRow {
            id: 5,
            label: Some("Book now".into()),
            description: None,
            url: Some("https://book.example.com".into()),
        }];
    });
    let llm = ScriptedCompletion::new(vec![
        tool_calls(&[("launch_rocket", json!({})), ("book_now", json!({}))]),
        reply("No rockets, but you can book below."),
    ]);
    let orchestrator = orchestrator(store.clone(), Arc::new(CountingEmbedder::default()), llm.clone(), &Upstreams::default());

    let outcome = orchestrator.run(api_request("launch it, then book me")).await.unwrap();
    assert_eq!(outcome.tool_call_count, 2);
    assert_eq!(
        outcome.custom_button,
        Some(json!({ "id": 5, "label": "Book now", "url": "https://book.example.com" }))
    );
    let keys: Vec<_> = outcome.tool_calls_ms.iter().map(|t| t.action_key.as_str()).collect();
    assert_eq!(keys, vec!["launch_rocket", "book_now"]);

    let outputs = function_outputs(&llm.requests()[1].input);
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0]["call_id"], "call_launch_rocket");
    assert_eq!(outputs[1]["call_id"], "call_book_now");
    let unknown: Value = serde_json::from_str(outputs[0]["output"].as_str().unwrap()).unwrap();
    assert_eq!(unknown["response"]["ok"], false);
    let button: Value = serde_json::from_str(outputs[1]["output"].as_str().unwrap()).unwrap();
    assert_eq!(button["response"]["ok"], true);
}

#[tokio::test]
async fn test_failed_refresh_removes_connection_but_turn_succeeds() {
    let router = Router::new().route(
        "/token",
        post(|| async { (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))) }),
    );
    let base = spawn_upstream(router).await;
    let upstreams = Upstreams {
        token_url: format!("{}/token", base),
        ..Upstreams::default()
    };

    let store = MemoryStore::with_agent();
    store.update(|s| {
        s.rows.calendar = Some(CalendarSettingsRow {
            create_enabled: true,
            timezone: Some("UTC".into()),
            ..Default::default()
        });
        s.rows.calendar_connection = Some(OAuthConnection {
            access_token: Some("stale".into()),
            refresh_token: Some("refresh".into()),
            token_type: Some("Bearer".into()),
            expires_at: Some("2020-01-01T00:00:00Z".into()),
        });
    });
    let llm = ScriptedCompletion::new(vec![
        tool_call("create_calendar_event", json!({ "start_time": "2030-06-03T10:00" })),
        reply("I could not reach the calendar, please try later."),
    ]);
    let orchestrator = orchestrator(store.clone(), Arc::new(CountingEmbedder::default()), llm.clone(), &upstreams);

    let outcome = orchestrator.run(api_request("Book me Monday at 10")).await.unwrap();
    assert_eq!(outcome.reply, "I could not reach the calendar, please try later.");
    assert_eq!(store.deleted(), vec![(AGENT.to_string(), OAuthProvider::Calendar)]);

    let outputs = function_outputs(&llm.requests()[1].input);
    let result: Value = serde_json::from_str(outputs[0]["output"].as_str().unwrap()).unwrap();
    assert_eq!(result["response"]["status"], 401);
    assert_eq!(result["response"]["error"], "Token refresh failed");
}

#[tokio::test]
async fn test_gate_failures_never_reach_the_model() {
    let store = MemoryStore::with_agent();
    let llm = ScriptedCompletion::new(vec![reply("unused")]);
    let orchestrator = orchestrator(store.clone(), Arc::new(CountingEmbedder::default()), llm.clone(), &Upstreams::default());

    let wrong_key = api_request("hello there").with_auth_token(Some("nope".into()));
    let err = orchestrator.run(wrong_key).await.unwrap_err();
    assert_eq!(err, ChatError::Unauthorized("Invalid API key".into()));

    let unknown = RequestContext::new(Channel::Api, "ghost", "hello there").with_auth_token(Some(API_KEY.into()));
    let err = orchestrator.run(unknown).await.unwrap_err();
    assert_eq!(err, ChatError::Unauthorized("Agent not found".into()));

    let widget = RequestContext::new(Channel::Widget, AGENT, "hello there");
    let err = orchestrator.run(widget).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    store.update(|s| s.usage = Some(QuotaUsage { messages: 100, cap: 100 }));
    let err = orchestrator.run(api_request("hello there")).await.unwrap_err();
    assert_eq!(err, ChatError::QuotaExceeded("Message limit reached".into()));

    assert!(llm.requests().is_empty());
    assert!(store.transcripts().is_empty());
}

#[tokio::test]
async fn test_context_failure_aborts_with_collaborator_status() {
    let store = MemoryStore::with_agent();
    store.fail("agent_profile", ChatError::NotFound("Agent not found".into()));
    let llm = ScriptedCompletion::new(vec![reply("unused")]);
    let orchestrator = orchestrator(store, Arc::new(CountingEmbedder::default()), llm.clone(), &Upstreams::default());

    let err = orchestrator.run(api_request("What are your hours?")).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
    assert!(llm.requests().is_empty());
}

#[tokio::test]
async fn test_analytics_failure_is_ignored() {
    let store = MemoryStore::with_agent();
    store.fail("persist_analytics", ChatError::Upstream("Failed to save analytics".into()));
    let llm = ScriptedCompletion::new(vec![reply("Fine.")]);
    let orchestrator = orchestrator(store.clone(), Arc::new(CountingEmbedder::default()), llm, &Upstreams::default());

    let outcome = orchestrator.run(api_request("how are you")).await.unwrap();
    assert_eq!(outcome.reply, "Fine.");
    assert_eq!(store.transcripts().len(), 1);
}

#[tokio::test]
async fn test_transcript_failure_fails_the_turn() {
    let store = MemoryStore::with_agent();
    store.fail("persist_transcript", ChatError::Upstream("Failed to save message".into()));
    let llm = ScriptedCompletion::new(vec![reply("Fine.")]);
    let orchestrator = orchestrator(store.clone(), Arc::new(CountingEmbedder::default()), llm, &Upstreams::default());

    let err = orchestrator.run(api_request("how are you")).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    assert!(store.wait_for_analytics().await.is_empty());
}

#[tokio::test]
async fn test_empty_followup_is_model_error() {
    let store = MemoryStore::with_agent();
    store.update(|s| {
        s.rows.buttons = vec![ButtonRow {
            id: 1,
            label: Some("Menu".into()),
            description: None,
            url: Some("https://example.com/menu".into()),
        }];
    });
    let mut empty = reply("").unwrap();
    empty.reply_text = "   ".into();
    let llm = ScriptedCompletion::new(vec![tool_call("menu", json!({})), Ok(empty)]);
    let orchestrator = orchestrator(store.clone(), Arc::new(CountingEmbedder::default()), llm, &Upstreams::default());

    let err = orchestrator.run(api_request("show me the menu")).await.unwrap_err();
    assert_eq!(err, ChatError::ModelOutput("Empty model output".into()));
    assert!(store.transcripts().is_empty());
    assert!(store.wait_for_analytics().await.is_empty());
}
