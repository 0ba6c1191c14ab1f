//! Plain HTTP actions: custom endpoints, webhook relays and chat webhooks

use std::time::Instant;

use reqwest::Method;
use serde_json::{json, Value};

use super::{append_query, elapsed_ms, read_response, snapshot, ToolTiming};
use crate::domain::{ActionResponse, HttpTarget, RequestSnapshot};
use crate::error::ChatError;

/// Variables as query pairs; strings go raw, everything else as JSON text.
fn query_pairs(variables: &Value) -> Vec<(String, String)> {
    let Some(map) = variables.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

pub(super) async fn execute(
    http: &reqwest::Client,
    target: &HttpTarget,
    variables: &Value,
    timing: &mut ToolTiming,
) -> (RequestSnapshot, ActionResponse) {
    let method = Method::from_bytes(target.method.as_bytes()).unwrap_or(Method::POST);
    let mut headers = target.headers.clone();

    let (url, body) = if method == Method::GET {
        (append_query(&target.url, &query_pairs(variables)), None)
    } else {
        if !headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("content-type")) {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        (target.url.clone(), Some(variables.clone()))
    };

    let request = snapshot(method.as_str(), &url, &headers, body.clone().unwrap_or(Value::Null));

    let mut builder = http.request(method, &url);
    for (name, value) in &headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
        builder = builder.body(body.to_string());
    }

    let response = send(builder, timing).await;
    (request, response)
}

pub(super) async fn execute_chat(
    http: &reqwest::Client,
    url: &str,
    username: &str,
    variables: &Value,
    timing: &mut ToolTiming,
) -> (RequestSnapshot, ActionResponse) {
    let text = variables
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let body = json!({ "text": text, "username": username });
    let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    let request = snapshot("POST", url, &headers, body.clone());

    let builder = http.post(url).json(&body);
    let response = send(builder, timing).await;
    (request, response)
}

pub(super) async fn send(builder: reqwest::RequestBuilder, timing: &mut ToolTiming) -> ActionResponse {
    let started = Instant::now();
    let result = builder.send().await;
    let response = match result {
        Ok(response) => read_response(response).await,
        Err(e) => {
            tracing::warn!(error = %e, "action request failed");
            ActionResponse::from_error(&ChatError::Upstream("Action request failed".to_string()))
        }
    };
    timing.action_request_ms = Some(elapsed_ms(started));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_stringify_non_strings() {
        let pairs = query_pairs(&json!({"name": "Ada", "count": 3, "tags": ["a"], "skip": null}));
        assert!(pairs.contains(&("name".to_string(), "Ada".to_string())));
        assert!(pairs.contains(&("count".to_string(), "3".to_string())));
        assert!(pairs.contains(&("tags".to_string(), "[\"a\"]".to_string())));
        assert_eq!(pairs.len(), 3);
    }
}
