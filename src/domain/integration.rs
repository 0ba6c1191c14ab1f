//! Raw integration rows as stored per agent, before they become tools.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which OAuth-backed integration a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthProvider {
    Gmail,
    Calendar,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Gmail => "gmail",
            OAuthProvider::Calendar => "calendar",
        }
    }
}

/// Stored OAuth credentials for one agent's integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthConnection {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// RFC 3339 expiry, absent when the provider never reported one
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Generic HTTP action, also the shape of both webhook relay tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpActionRow {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    /// Either a JSON object or a JSON-encoded string of one
    #[serde(default)]
    pub headers: Option<Value>,
    /// JSON schema for the tool parameters, object or string
    #[serde(default)]
    pub body_template: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatWebhookRow {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailFeatureRow {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarSettingsRow {
    #[serde(default)]
    pub create_enabled: bool,
    #[serde(default)]
    pub list_enabled: bool,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub duration_mins: Option<i64>,
    #[serde(default)]
    pub open_hour: Option<i32>,
    #[serde(default)]
    pub close_hour: Option<i32>,
    #[serde(default)]
    pub require_attendee: bool,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ButtonRow {
    pub id: i64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Everything the catalog builder needs for one agent.
#[derive(Debug, Clone, Default)]
pub struct IntegrationRows {
    pub custom_actions: Vec<HttpActionRow>,
    pub zapier_actions: Vec<HttpActionRow>,
    pub make_actions: Vec<HttpActionRow>,
    pub chat_webhooks: Vec<ChatWebhookRow>,
    pub email: Option<EmailFeatureRow>,
    pub email_connection: Option<OAuthConnection>,
    pub calendar: Option<CalendarSettingsRow>,
    pub calendar_connection: Option<OAuthConnection>,
    pub buttons: Vec<ButtonRow>,
}
