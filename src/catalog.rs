//! Turns an agent's integration rows into function tools plus a lookup map
//! keyed by the sanitized tool name the model will call back with.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};

use crate::domain::integration::{
    ButtonRow, CalendarSettingsRow, ChatWebhookRow, EmailFeatureRow, HttpActionRow,
};
use crate::domain::{
    ActionDefinition, ActionKind, CalendarSettings, HttpTarget, IntegrationRows, OAuthConnection,
    RelayService, ToolDescriptor,
};

pub const MAX_TOOL_NAME_LEN: usize = 64;

const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_CALENDAR_ID: &str = "primary";

/// Tools advertised to the model and the definitions behind them.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    tools: Vec<ToolDescriptor>,
    actions: HashMap<String, ActionDefinition>,
}

impl ActionCatalog {
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn resolve(&self, tool_name: &str) -> Option<&ActionDefinition> {
        self.actions.get(tool_name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn push(&mut self, action: ActionDefinition) {
        self.tools.push(action.descriptor());
        self.actions.insert(action.tool_name.clone(), action);
    }
}

/// Lowercases, collapses runs of characters outside `[a-z0-9_-]` into `_`,
/// trims underscores and guarantees a leading letter, capped at 64 chars.
pub fn sanitize_tool_name(title: &str, fallback_key: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut in_run = false;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    let trimmed = out.trim_matches('_');
    let mut name = if trimmed.is_empty() {
        format!("action_{}", key_fragment(fallback_key))
    } else if !trimmed.starts_with(|c: char| c.is_ascii_lowercase()) {
        format!("action_{}", trimmed)
    } else {
        trimmed.to_string()
    };
    name.truncate(MAX_TOOL_NAME_LEN);
    name
}

fn key_fragment(key: &str) -> String {
    key.chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

struct CatalogBuilder {
    catalog: ActionCatalog,
    used: HashSet<String>,
}

impl CatalogBuilder {
    fn new() -> Self {
        Self {
            catalog: ActionCatalog::default(),
            used: HashSet::new(),
        }
    }

    /// Picks a globally unique name, suffixing the stable key on collision.
    fn claim_name(&mut self, title: &str, key: &str) -> String {
        let base = sanitize_tool_name(title, key);
        if self.used.insert(base.clone()) {
            return base;
        }

        let key = key_fragment(key);
        let mut attempt = 1;
        loop {
            let suffix = if attempt == 1 {
                format!("_{}", key)
            } else {
                format!("_{}_{}", key, attempt)
            };
            let keep = MAX_TOOL_NAME_LEN.saturating_sub(suffix.len());
            let mut candidate: String = base.chars().take(keep).collect();
            candidate.push_str(&suffix);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            attempt += 1;
        }
    }

    fn add(&mut self, title: &str, key: &str, description: String, parameters: Value, kind: ActionKind) {
        let tool_name = self.claim_name(title, key);
        self.catalog.push(ActionDefinition {
            tool_name,
            title: title.to_string(),
            description,
            parameters,
            kind,
        });
    }

    fn add_http_rows(&mut self, rows: &[HttpActionRow], relay: Option<RelayService>) {
        for row in rows {
            let title = row.title.clone().unwrap_or_default();
            let key = row.id.to_string();
            let method = match relay {
                Some(_) => "POST".to_string(),
                None => row
                    .method
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .unwrap_or("POST")
                    .to_uppercase(),
            };
            let target = HttpTarget {
                url: row.url.clone().unwrap_or_default(),
                method,
                headers: parse_headers(row.headers.as_ref()),
            };
            let description = non_empty(row.description.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| match relay {
                    Some(RelayService::Zapier) => format!("Run the Zapier automation \"{}\"", title),
                    Some(RelayService::Make) => format!("Run the Make scenario \"{}\"", title),
                    None => format!("Call the \"{}\" action", title),
                });
            let kind = match relay {
                Some(service) => ActionKind::WebhookRelay { service, target },
                None => ActionKind::GenericHttp(target),
            };
            self.add(&title, &key, description, parse_parameters(row.body_template.as_ref()), kind);
        }
    }

    fn add_chat_webhooks(&mut self, rows: &[ChatWebhookRow]) {
        for row in rows {
            let title = row.title.clone().unwrap_or_default();
            let description = non_empty(row.description.as_deref())
                .unwrap_or("Send a notification message to the team chat")
                .to_string();
            let parameters = json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string", "description": "Message text to post"}
                },
                "required": ["message"],
                "additionalProperties": false
            });
            let kind = ActionKind::ChatWebhook {
                url: row.webhook_url.clone().unwrap_or_default(),
                username: non_empty(row.username.as_deref()).map(str::to_string),
            };
            self.add(&title, &row.id.to_string(), description, parameters, kind);
        }
    }

    fn add_email(&mut self, feature: &EmailFeatureRow, connection: &OAuthConnection) {
        let title = non_empty(feature.title.as_deref()).unwrap_or("send_email");
        let description = non_empty(feature.description.as_deref())
            .unwrap_or("Send an email on behalf of the business. Provide recipient, subject and plain-text body.")
            .to_string();
        let parameters = json!({
            "type": "object",
            "properties": {
                "to": {"type": "string", "description": "Recipient email address"},
                "subject": {"type": "string"},
                "body": {"type": "string", "description": "Plain-text message body"},
                "cc": {"type": "string"},
                "bcc": {"type": "string"}
            },
            "required": ["to", "subject", "body"],
            "additionalProperties": false
        });
        let kind = ActionKind::EmailSend {
            connection: connection.clone(),
        };
        self.add(title, "gmail", description, parameters, kind);
    }

    fn add_calendar(&mut self, row: &CalendarSettingsRow, connection: &OAuthConnection) {
        let calendar = calendar_settings(row);

        if row.create_enabled {
            let mut required = vec!["start_time"];
            if calendar.require_attendee {
                required.push("attendees");
            }
            let parameters = json!({
                "type": "object",
                "properties": {
                    "start_time": {
                        "type": "string",
                        "description": "Local start time in YYYY-MM-DDTHH:MM"
                    },
                    "attendees": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Attendee email addresses"
                    }
                },
                "required": required,
                "additionalProperties": false
            });
            self.add(
                "create_calendar_event",
                "calendar_create",
                describe_calendar_create(&calendar),
                parameters,
                ActionKind::CalendarCreate {
                    connection: connection.clone(),
                    calendar: calendar.clone(),
                },
            );
        }

        if row.list_enabled {
            let parameters = json!({
                "type": "object",
                "properties": {
                    "time_min": {"type": "string", "description": "Local range start, YYYY-MM-DDTHH:MM"},
                    "time_max": {"type": "string", "description": "Local range end, YYYY-MM-DDTHH:MM"},
                    "max_results": {"type": "integer"}
                },
                "required": ["time_min", "time_max"],
                "additionalProperties": false
            });
            let description = format!(
                "Check availability on our calendar between two local times. Time zone: {}.",
                calendar.timezone
            );
            self.add(
                "list_calendar_events",
                "calendar_list",
                description,
                parameters,
                ActionKind::CalendarList {
                    connection: connection.clone(),
                    calendar,
                },
            );
        }
    }

    fn add_buttons(&mut self, rows: &[ButtonRow]) {
        for row in rows {
            let label = row.label.clone().unwrap_or_default();
            let description = non_empty(row.description.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Show the \"{}\" button to the user", label));
            let payload = json!({
                "id": row.id,
                "label": label,
                "url": row.url,
            });
            self.add(
                &label,
                &row.id.to_string(),
                description,
                empty_parameters(),
                ActionKind::EphemeralButton { payload },
            );
        }
    }
}

/// Builds the catalog for one request. Email and calendar tools appear only
/// when their feature row is enabled and a connection exists.
pub fn build_catalog(rows: &IntegrationRows) -> ActionCatalog {
    let mut builder = CatalogBuilder::new();

    builder.add_http_rows(&rows.custom_actions, None);
    builder.add_http_rows(&rows.zapier_actions, Some(RelayService::Zapier));
    builder.add_http_rows(&rows.make_actions, Some(RelayService::Make));
    builder.add_chat_webhooks(&rows.chat_webhooks);

    if let (Some(feature), Some(connection)) = (&rows.email, &rows.email_connection) {
        if feature.enabled {
            builder.add_email(feature, connection);
        }
    }

    if let (Some(settings), Some(connection)) = (&rows.calendar, &rows.calendar_connection) {
        builder.add_calendar(settings, connection);
    }

    builder.add_buttons(&rows.buttons);

    builder.catalog
}

fn calendar_settings(row: &CalendarSettingsRow) -> CalendarSettings {
    CalendarSettings {
        calendar_id: non_empty(row.calendar_id.as_deref())
            .unwrap_or(DEFAULT_CALENDAR_ID)
            .to_string(),
        timezone: non_empty(row.timezone.as_deref())
            .unwrap_or(DEFAULT_TIMEZONE)
            .to_string(),
        duration_minutes: row.duration_mins.filter(|d| *d > 0),
        open_hour: row.open_hour,
        close_hour: row.close_hour,
        require_attendee: row.require_attendee,
        event_type: non_empty(row.event_type.as_deref()).map(str::to_string),
        location: non_empty(row.location.as_deref()).map(str::to_string),
    }
}

fn describe_calendar_create(calendar: &CalendarSettings) -> String {
    let duration = calendar
        .duration_minutes
        .map(|d| format!("{} minutes", d))
        .unwrap_or_else(|| "default".to_string());
    let hours = match (calendar.open_hour, calendar.close_hour) {
        (Some(open), Some(close)) => format!("{}:00-{}:00", open, close),
        _ => "not set".to_string(),
    };
    let attendee = if calendar.require_attendee {
        "Attendee email is required."
    } else {
        "Attendee email is optional."
    };
    let event_type = calendar.event_type.as_deref().unwrap_or("not set");
    format!(
        "Book an appointment on our calendar. Time zone: {}. Duration: {}. Open hours: {}. {} Event type: {}. Pass start_time as local time, YYYY-MM-DDTHH:MM.",
        calendar.timezone, duration, hours, attendee, event_type
    )
}

fn empty_parameters() -> Value {
    json!({"type": "object", "properties": {}, "additionalProperties": false})
}

fn parse_parameters(template: Option<&Value>) -> Value {
    match template {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => empty_parameters(),
        },
        _ => empty_parameters(),
    }
}

fn parse_headers(headers: Option<&Value>) -> Vec<(String, String)> {
    let map: Map<String, Value> = match headers {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    map.into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
