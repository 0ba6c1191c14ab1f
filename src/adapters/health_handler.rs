use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Settings;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub model: String,
    pub store: String,
    pub oauth: String,
}

fn configured(present: bool) -> String {
    if present { "ok" } else { "missing" }.to_string()
}

pub struct HealthHandler {
    settings: Arc<Settings>,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            start_time: std::time::Instant::now(),
        }
    }

    fn checks(&self) -> HealthChecks {
        let settings = &self.settings;
        HealthChecks {
            model: configured(settings.model_api_key().is_some()),
            store: configured(settings.store.url.is_some() && settings.store_service_key().is_some()),
            oauth: configured(
                settings.google.client_id.is_some() && settings.google.client_secret.is_some(),
            ),
        }
    }

    /// Returns 200 while the process is up; `checks` reports which secrets are configured.
    pub async fn health(&self) -> impl IntoResponse {
        let status = HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            checks: self.checks(),
        };

        (StatusCode::OK, Json(status))
    }

    /// 503 until the model and store credentials are present
    pub async fn ready(&self) -> impl IntoResponse {
        let checks = self.checks();
        if checks.model == "ok" && checks.store == "ok" {
            (StatusCode::OK, Json(serde_json::json!({
                "status": "ready",
                "message": "Server is ready to accept requests"
            })))
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({
                "status": "not_ready",
                "message": "Model or store credentials are not configured"
            })))
        }
    }

    pub async fn live(&self) -> impl IntoResponse {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "alive",
            "message": "Server is alive"
        })))
    }
}
