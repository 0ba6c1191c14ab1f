use thiserror::Error;

use crate::config::{ModelSettings, ServerSettings, Settings};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Startup checks only. Missing secrets are reported per request instead.
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        Self::validate_server(&settings.server, &mut errors);
        Self::validate_model(&settings.model, &mut errors);

        if settings.stream.heartbeat_seconds == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "stream.heartbeat_seconds".to_string(),
                reason: "Heartbeat interval must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings, errors: &mut Vec<ValidationError>) {
        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }
    }

    fn validate_model(model: &ModelSettings, errors: &mut Vec<ValidationError>) {
        for (field, value) in [
            ("model.base_url", &model.base_url),
            ("model.primary_model", &model.primary_model),
            ("model.followup_model", &model.followup_model),
            ("model.embedding_model", &model.embedding_model),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::MissingField(field.to_string()));
            }
        }

        if model.timeout_seconds == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "model.timeout_seconds".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        assert!(ConfigValidator::validate(&Settings::default()).is_ok());
    }

    #[test]
    fn test_invalid_port() {
        let mut settings = Settings::default();
        settings.server.port = 0;

        let result = ConfigValidator::validate(&settings);
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("Port must be greater than 0"));
    }

    #[test]
    fn test_collects_every_error() {
        let mut settings = Settings::default();
        settings.server.host = String::new();
        settings.model.primary_model = " ".to_string();
        settings.stream.heartbeat_seconds = 0;

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(messages.len(), 3);
        assert!(messages.contains(&"Missing required field: server.host".to_string()));
        assert!(messages.contains(&"Missing required field: model.primary_model".to_string()));
        assert!(messages.iter().any(|m| m.contains("stream.heartbeat_seconds")));
    }
}
