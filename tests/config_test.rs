use parley::cli::Cli;
use parley::config::Settings;
use parley::orchestrator::OrchestratorConfig;
use secrecy::ExposeSecret;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_config_file_with_cli_overrides() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("parley.toml");

    let toml = r#"
[server]
host = "127.0.0.1"
port = 3000

[model]
api_key = "sk-test"
primary_model = "gpt-4o"
primary_verbosity = ""

[store]
url = "https://db.example.com"
service_key = "service"

[google]
calendar_api_url = "https://calendar.example.com/v3/"

[widget]
allowed_origins = ["Chat.Example.com"]

[conversation]
history_rows = 5
skip_messages = ["  Howdy! "]

[stream]
heartbeat_seconds = 5
"#;
    fs::write(&path, toml)?;

    let cli = Cli {
        config: path,
        host: Some("0.0.0.0".to_string()),
        port: Some(9090),
    };
    let settings = Settings::new_with_cli(&cli)?;

    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 9090);
    assert_eq!(settings.model_api_key().unwrap().expose_secret(), "sk-test");
    assert_eq!(settings.model.followup_model, "gpt-5-nano");
    assert_eq!(settings.store_service_key().unwrap().expose_secret(), "service");
    assert_eq!(settings.dispatch().calendar_api_url, "https://calendar.example.com/v3");
    assert_eq!(settings.dispatch().chat_username, "MitsoLab");
    assert_eq!(settings.widget_hosts(), vec!["chat.example.com"]);
    assert_eq!(settings.stream.heartbeat_seconds, 5);
    assert!(settings.oauth_client().client_id.is_none());

    let orchestrator = OrchestratorConfig::from_settings(&settings);
    assert_eq!(orchestrator.primary_model, "gpt-4o");
    assert_eq!(orchestrator.primary_verbosity, None);
    assert_eq!(orchestrator.history_rows, 5);
    assert!(orchestrator.skip_messages.contains("howdy"));

    Ok(())
}

#[test]
fn test_missing_file_uses_defaults() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let cli = Cli {
        config: temp_dir.path().join("absent.toml"),
        host: None,
        port: None,
    };
    let settings = Settings::new_with_cli(&cli)?;

    assert_eq!(settings.server.port, 3000);
    assert!(settings.model_api_key().is_none());
    assert_eq!(settings.conversation.history_rows, 3);
    assert_eq!(settings.google.token_url, "https://oauth2.googleapis.com/token");
    Ok(())
}

#[test]
fn test_invalid_values_are_rejected() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("parley.toml");
    fs::write(
        &path,
        r#"
[server]
host = "127.0.0.1"
port = 3000

[stream]
heartbeat_seconds = 0
"#,
    )?;

    let cli = Cli {
        config: path,
        host: None,
        port: None,
    };
    let err = Settings::new_with_cli(&cli).unwrap_err();
    assert!(err.to_string().contains("Configuration validation failed"));
    Ok(())
}
