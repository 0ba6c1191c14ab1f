//! OAuth access-token lifecycle for Google-backed actions.
//!
//! A stored token is used as-is until it is within [`EXPIRY_SKEW_SECONDS`] of
//! expiring. Past that point a single refresh-token grant is attempted; if it
//! cannot succeed the connection is deleted so the agent owner has to
//! reconnect. Two requests refreshing the same connection concurrently is an
//! accepted race: both grants succeed and the later write wins.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::domain::{ContextStore, OAuthConnection, OAuthProvider, TokenRefresh};
use crate::error::{ChatError, ChatResult};
use crate::timezone::parse_instant;

pub const EXPIRY_SKEW_SECONDS: i64 = 30;

const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Client registration used for refresh grants
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: Option<SecretString>,
    pub client_secret: Option<SecretString>,
    pub token_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub token_type: String,
}

impl AccessToken {
    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
}

/// True when the token is already expired or expires within the skew window.
/// An absent or unparsable expiry counts as still valid.
pub fn is_expiring(connection: &OAuthConnection, now: DateTime<Utc>) -> bool {
    connection
        .expires_at
        .as_deref()
        .and_then(parse_instant)
        .map(|expires_at| expires_at <= now + Duration::seconds(EXPIRY_SKEW_SECONDS))
        .unwrap_or(false)
}

pub struct TokenManager {
    http: reqwest::Client,
    store: Arc<dyn ContextStore>,
    client: OAuthClientConfig,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, store: Arc<dyn ContextStore>, client: OAuthClientConfig) -> Self {
        Self { http, store, client }
    }

    /// Returns a usable token for the connection, refreshing at most once.
    pub async fn ensure_access_token(
        &self,
        agent_id: &str,
        provider: OAuthProvider,
        connection: &OAuthConnection,
    ) -> ChatResult<AccessToken> {
        let Some(access_token) = connection.access_token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(ChatError::Unauthorized("Missing access token".to_string()));
        };

        if !is_expiring(connection, Utc::now()) {
            return Ok(AccessToken {
                token: access_token.to_string(),
                token_type: connection
                    .token_type
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            });
        }

        let refresh_token = connection.refresh_token.as_deref().filter(|t| !t.is_empty());
        let (Some(refresh_token), Some(client_id), Some(client_secret)) =
            (refresh_token, &self.client.client_id, &self.client.client_secret)
        else {
            self.invalidate(agent_id, provider).await;
            return Err(ChatError::Unauthorized(
                "Token expired and cannot be refreshed".to_string(),
            ));
        };

        let refreshed = match self.refresh(refresh_token, client_id, client_secret).await {
            Ok(refreshed) => refreshed,
            Err(reason) => {
                tracing::warn!(agent_id, provider = provider.as_str(), %reason, "token refresh failed");
                self.invalidate(agent_id, provider).await;
                return Err(ChatError::Unauthorized("Token refresh failed".to_string()));
            }
        };

        if let Err(e) = self
            .store
            .store_refreshed_token(agent_id, provider, &refreshed)
            .await
        {
            tracing::warn!(agent_id, provider = provider.as_str(), error = %e, "could not persist refreshed token");
        }

        Ok(AccessToken {
            token: refreshed.access_token,
            token_type: refreshed.token_type,
        })
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &SecretString,
        client_secret: &SecretString,
    ) -> Result<TokenRefresh, String> {
        let response = self
            .http
            .post(&self.client.token_url)
            .form(&[
                ("client_id", client_id.expose_secret()),
                ("client_secret", client_secret.expose_secret()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| format!("token endpoint unreachable: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("token endpoint returned {}", status));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid token response: {}", e))?;

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "token response had no access_token".to_string())?;

        let expires_at = body.expires_in.map(|secs| {
            (Utc::now() + Duration::seconds(secs)).to_rfc3339_opts(SecondsFormat::Millis, true)
        });

        Ok(TokenRefresh {
            access_token,
            token_type: body
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            expires_at,
        })
    }

    async fn invalidate(&self, agent_id: &str, provider: OAuthProvider) {
        tracing::warn!(agent_id, provider = provider.as_str(), "removing unusable OAuth connection");
        if let Err(e) = self.store.delete_connection(agent_id, provider).await {
            tracing::warn!(agent_id, provider = provider.as_str(), error = %e, "could not delete OAuth connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(expires_at: Option<&str>) -> OAuthConnection {
        OAuthConnection {
            access_token: Some("tok".into()),
            refresh_token: Some("refresh".into()),
            token_type: None,
            expires_at: expires_at.map(str::to_string),
        }
    }

    #[test]
    fn test_is_expiring_window() {
        let now = parse_instant("2024-06-01T12:00:00Z").unwrap();
        assert!(!is_expiring(&connection(None), now));
        assert!(!is_expiring(&connection(Some("not a date")), now));
        assert!(!is_expiring(&connection(Some("2024-06-01T12:00:31Z")), now));
        assert!(is_expiring(&connection(Some("2024-06-01T12:00:30Z")), now));
        assert!(is_expiring(&connection(Some("2024-06-01T11:00:00Z")), now));
    }

    #[test]
    fn test_authorization_header() {
        let token = AccessToken {
            token: "abc".into(),
            token_type: "Bearer".into(),
        };
        assert_eq!(token.authorization(), "Bearer abc");
    }
}
