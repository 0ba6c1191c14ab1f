//! Email send through the provider's raw-message endpoint

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{json, Value};

use super::{variable_str, ToolTiming};
use crate::domain::{ActionResponse, RequestSnapshot};
use crate::error::ChatError;
use crate::oauth::AccessToken;

/// Header values never carry line breaks into the message head.
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Plain-text RFC 2822 message from the tool variables.
pub fn build_mime_message(variables: &Value) -> String {
    let to = variable_str(variables, "to").unwrap_or_default();
    let subject = variable_str(variables, "subject").unwrap_or_default();
    let body = variables.get("body").and_then(Value::as_str).unwrap_or_default();

    let mut lines = vec![format!("To: {}", header_value(to))];
    if let Some(cc) = variable_str(variables, "cc") {
        lines.push(format!("Cc: {}", header_value(cc)));
    }
    if let Some(bcc) = variable_str(variables, "bcc") {
        lines.push(format!("Bcc: {}", header_value(bcc)));
    }
    lines.push(format!("Subject: {}", header_value(subject)));
    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/plain; charset=UTF-8".to_string());
    lines.push(String::new());
    lines.push(body.to_string());
    lines.join("\r\n")
}

pub(super) fn snapshot_body(variables: &Value) -> Value {
    json!({
        "to": variables.get("to").cloned().unwrap_or(Value::Null),
        "subject": variables.get("subject").cloned().unwrap_or(Value::Null),
        "body": variables.get("body").cloned().unwrap_or(Value::Null),
        "cc": variables.get("cc").cloned().unwrap_or(Value::Null),
        "bcc": variables.get("bcc").cloned().unwrap_or(Value::Null),
    })
}

pub(super) fn snapshot(url: &str, token: Option<&AccessToken>, variables: &Value) -> RequestSnapshot {
    let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    headers.extend(super::bearer_headers(token));
    super::snapshot("POST", url, &headers, snapshot_body(variables))
}

pub(super) async fn send(
    http: &reqwest::Client,
    request: &RequestSnapshot,
    token: &AccessToken,
    variables: &Value,
    timing: &mut ToolTiming,
) -> ActionResponse {
    if variable_str(variables, "to").is_none() {
        return ActionResponse::from_error(&ChatError::Validation("Recipient address is required".to_string()));
    }
    let raw = URL_SAFE_NO_PAD.encode(build_mime_message(variables));
    let builder = http
        .post(&request.url)
        .header("Authorization", token.authorization())
        .json(&json!({ "raw": raw }));
    super::http::send(builder, timing).await
}
