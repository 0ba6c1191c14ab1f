//! Inbound request identity

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which surface the request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Server-to-server API, bearer-key authenticated
    Api,
    /// Browser-embedded widget, origin authenticated
    Widget,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Api => "api",
            Channel::Widget => "widget",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationId {
    pub anon_id: String,
    pub chat_id: String,
}

impl ConversationId {
    /// Fills in missing identifiers.
    ///
    /// When both are absent a single generated value is used for both, so a
    /// brand-new visitor starts exactly one conversation.
    pub fn resolve(anon_id: Option<String>, chat_id: Option<String>) -> Self {
        let anon_id = anon_id.filter(|s| !s.is_empty());
        let chat_id = chat_id.filter(|s| !s.is_empty());
        match (anon_id, chat_id) {
            (None, None) => {
                let id = generate_id();
                Self {
                    anon_id: id.clone(),
                    chat_id: id,
                }
            }
            (anon_id, chat_id) => Self {
                anon_id: anon_id.unwrap_or_else(generate_id),
                chat_id: chat_id.unwrap_or_else(generate_id),
            },
        }
    }
}

/// Random URL-safe identifier, `id_` followed by alphanumerics only.
pub fn generate_id() -> String {
    let bytes: [u8; 12] = rand::random();
    let encoded: String = URL_SAFE_NO_PAD
        .encode(bytes)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    format!("id_{}", encoded)
}

/// Immutable description of one chat turn request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub channel: Channel,
    pub agent_id: String,
    pub conversation: ConversationId,
    pub message: String,
    pub auth_token: Option<String>,
    pub country_code: Option<String>,
    pub wants_stream: bool,
}

impl RequestContext {
    pub fn new(channel: Channel, agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            channel,
            agent_id: agent_id.into(),
            conversation: ConversationId::resolve(None, None),
            message: message.into(),
            auth_token: None,
            country_code: None,
            wants_stream: false,
        }
    }

    pub fn with_conversation(mut self, conversation: ConversationId) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_country_code(mut self, country: Option<String>) -> Self {
        self.country_code = country;
        self
    }

    pub fn with_stream(mut self, wants_stream: bool) -> Self {
        self.wants_stream = wants_stream;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id();
        assert!(id.starts_with("id_"));
        assert!(id.len() > 10);
        assert!(id[3..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn test_resolve_both_missing_shares_one_id() {
        let conv = ConversationId::resolve(None, Some(String::new()));
        assert_eq!(conv.anon_id, conv.chat_id);
        assert!(conv.anon_id.starts_with("id_"));
    }

    #[test]
    fn test_resolve_one_missing_generates_only_that_one() {
        let conv = ConversationId::resolve(Some("visitor-1".into()), None);
        assert_eq!(conv.anon_id, "visitor-1");
        assert_ne!(conv.chat_id, "visitor-1");
        assert!(conv.chat_id.starts_with("id_"));

        let conv = ConversationId::resolve(None, Some("chat-9".into()));
        assert_eq!(conv.chat_id, "chat-9");
        assert!(conv.anon_id.starts_with("id_"));
    }

    #[test]
    fn test_resolve_keeps_supplied_ids() {
        let conv = ConversationId::resolve(Some("a".into()), Some("b".into()));
        assert_eq!(conv, ConversationId { anon_id: "a".into(), chat_id: "b".into() });
    }
}
