//! Resolved actions the model may invoke

use serde::Serialize;
use serde_json::Value;

use super::integration::OAuthConnection;

/// Which automation service relays a webhook action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayService {
    Zapier,
    Make,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpTarget {
    pub url: String,
    /// Upper-cased HTTP method
    pub method: String,
    /// Static headers in insertion order
    pub headers: Vec<(String, String)>,
}

/// Booking settings for a calendar integration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarSettings {
    pub calendar_id: String,
    pub timezone: String,
    pub duration_minutes: Option<i64>,
    pub open_hour: Option<i32>,
    pub close_hour: Option<i32>,
    pub require_attendee: bool,
    pub event_type: Option<String>,
    pub location: Option<String>,
}

impl CalendarSettings {
    /// Open hours are enforced only when both ends are sane and do not
    /// span the whole day.
    pub fn enforced_open_hours(&self) -> Option<(i32, i32)> {
        match (self.open_hour, self.close_hour) {
            (Some(open), Some(close)) if open >= 0 && close <= 24 => {
                if open == 0 && close == 24 {
                    None
                } else {
                    Some((open, close))
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    GenericHttp(HttpTarget),
    WebhookRelay {
        service: RelayService,
        target: HttpTarget,
    },
    ChatWebhook {
        url: String,
        username: Option<String>,
    },
    EmailSend {
        connection: OAuthConnection,
    },
    CalendarCreate {
        connection: OAuthConnection,
        calendar: CalendarSettings,
    },
    CalendarList {
        connection: OAuthConnection,
        calendar: CalendarSettings,
    },
    /// Resolved locally; the payload is handed to the client
    EphemeralButton {
        payload: Value,
    },
}

impl ActionKind {
    pub fn calendar(&self) -> Option<&CalendarSettings> {
        match self {
            ActionKind::CalendarCreate { calendar, .. } | ActionKind::CalendarList { calendar, .. } => {
                Some(calendar)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    pub tool_name: String,
    pub title: String,
    pub description: String,
    pub parameters: Value,
    pub kind: ActionKind,
}

impl ActionDefinition {
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            tool_type: "function",
            name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Function tool as advertised to the completion service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}
