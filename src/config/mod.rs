use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub mod validator;

use crate::cli::Cli;
use crate::dispatch::DispatchConfig;
use crate::oauth::OAuthClientConfig;
use crate::orchestrator::context::DEFAULT_SKIP_MESSAGES;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub google: GoogleSettings,
    #[serde(default)]
    pub widget: WidgetSettings,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Completion and embedding service
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub primary_model: String,
    pub primary_verbosity: String,
    pub followup_model: String,
    pub followup_reasoning_effort: String,
    pub followup_verbosity: String,
    pub embedding_model: String,
    pub timeout_seconds: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            primary_model: "gpt-4o-mini".to_string(),
            primary_verbosity: "medium".to_string(),
            followup_model: "gpt-5-nano".to_string(),
            followup_reasoning_effort: "minimal".to_string(),
            followup_verbosity: "low".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            timeout_seconds: 60,
        }
    }
}

/// PostgREST-style storage backend
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    pub url: Option<String>,
    #[serde(skip_serializing)]
    pub service_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GoogleSettings {
    #[serde(skip_serializing)]
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub token_url: String,
    pub gmail_send_url: String,
    pub calendar_api_url: String,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            gmail_send_url: "https://gmail.googleapis.com/gmail/v1/users/me/messages/send".to_string(),
            calendar_api_url: "https://www.googleapis.com/calendar/v3".to_string(),
        }
    }
}

/// Browser-embed channel
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WidgetSettings {
    /// Hostnames allowed to call the widget endpoint
    pub allowed_origins: Vec<String>,
    pub referer_path_prefix: String,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "app.mitsolab.com".to_string(),
                "www.app.mitsolab.com".to_string(),
            ],
            referer_path_prefix: "/widget".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConversationSettings {
    pub history_rows: usize,
    pub recent_prompts: usize,
    pub skip_messages: Vec<String>,
    /// Display name posted with chat-webhook messages
    pub chat_username: String,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            history_rows: 3,
            recent_prompts: 2,
            skip_messages: DEFAULT_SKIP_MESSAGES.iter().map(|s| s.to_string()).collect(),
            chat_username: "MitsoLab".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamSettings {
    pub heartbeat_seconds: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { heartbeat_seconds: 15 }
    }
}

fn secret(value: &Option<String>) -> Option<SecretString> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| SecretString::from(v.to_string()))
}

impl Settings {
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(cli.config.clone()).required(false))
            .add_source(Environment::with_prefix("PARLEY").separator("__"))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;

        // CLI > env vars > config file
        settings.apply_cli_overrides(cli);

        validator::ConfigValidator::validate(&settings).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })?;

        Ok(settings)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
    }

    pub fn model_api_key(&self) -> Option<SecretString> {
        secret(&self.model.api_key)
    }

    pub fn store_service_key(&self) -> Option<SecretString> {
        secret(&self.store.service_key)
    }

    pub fn oauth_client(&self) -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: secret(&self.google.client_id),
            client_secret: secret(&self.google.client_secret),
            token_url: self.google.token_url.clone(),
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            gmail_send_url: self.google.gmail_send_url.clone(),
            calendar_api_url: self.google.calendar_api_url.trim_end_matches('/').to_string(),
            chat_username: self.conversation.chat_username.clone(),
        }
    }

    /// Allowed widget hosts, lowercased
    pub fn widget_hosts(&self) -> Vec<String> {
        self.widget
            .allowed_origins
            .iter()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            model: ModelSettings::default(),
            store: StoreSettings::default(),
            google: GoogleSettings::default(),
            widget: WidgetSettings::default(),
            conversation: ConversationSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}
