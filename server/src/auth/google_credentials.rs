//! Stored Google authorized-user credential shared by the Sheets reader and
//! the Gmail transport.
//!
//! The credential lives in `token.json` in the format Google's client
//! libraries write. Interactive bootstrap is done outside this service; here
//! the access token is only refreshed and persisted again.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use config::{Config, ConfigError};
use derive_more::derive::Display;
use lib_email_clients::gmail::AccessTokenSource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::util::check_expired;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REVOKED_DESCRIPTION: &str = "Token has been expired or revoked.";

#[derive(Debug, Display, PartialEq)]
pub enum CredentialError {
    #[display("no stored Google credential at {_0}, run the authorization flow again")]
    Missing(String),
    #[display("stored Google credential was expired or revoked and has been discarded, run the authorization flow again")]
    Revoked,
    #[display("no OAuth client configured for refreshing the Google credential")]
    MissingClient,
    #[display("Google token refresh failed: {_0}")]
    Refresh(String),
}

impl std::error::Error for CredentialError {}

/// OAuth client from `client_secret.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl GoogleClientConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }
}

/// Contents of `token.json`. Unknown keys are carried through on rewrite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizedUser {
    #[serde(default)]
    pub token: Option<String>,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthorizedUser {
    /// Token usable without a refresh. A token without expiry is trusted.
    fn valid_token(&self) -> Option<&str> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        match self.expiry {
            Some(expiry) if check_expired(expiry) => None,
            _ => Some(token),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Splits a token endpoint reply into a refreshed token or a
/// [`CredentialError`]; a revoked refresh token is reported as
/// [`CredentialError::Revoked`].
fn parse_refresh_response(resp: Value) -> Result<RefreshTokenResponse, CredentialError> {
    if resp.get("error").is_some() {
        return Err(
            match resp.get("error_description").and_then(|d| d.as_str()) {
                Some(REVOKED_DESCRIPTION) => CredentialError::Revoked,
                Some(desc) => CredentialError::Refresh(desc.to_string()),
                None => CredentialError::Refresh(resp.to_string()),
            },
        );
    }

    serde_json::from_value::<RefreshTokenResponse>(resp.clone()).map_err(|_| {
        tracing::error!("Unexpected oauth2 refresh response: {:?}", resp);
        CredentialError::Refresh("unexpected token endpoint response".to_string())
    })
}

pub struct GoogleCredentials {
    http_client: reqwest::Client,
    token_path: PathBuf,
    client: Option<GoogleClientConfig>,
    stored: RwLock<Option<AuthorizedUser>>,
}

impl GoogleCredentials {
    /// Reads `token_path` if it exists. A missing file is not an error until
    /// a token is requested.
    pub async fn load(
        http_client: reqwest::Client,
        token_path: impl Into<PathBuf>,
        client: Option<GoogleClientConfig>,
    ) -> anyhow::Result<Self> {
        let token_path = token_path.into();
        let stored = match tokio::fs::read_to_string(&token_path).await {
            Ok(raw) => Some(serde_json::from_str::<AuthorizedUser>(&raw).map_err(|e| {
                anyhow::anyhow!("{} is not a valid credential: {}", token_path.display(), e)
            })?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("No Google credential at {}", token_path.display());
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            http_client,
            token_path,
            client,
            stored: RwLock::new(stored),
        })
    }

    async fn refresh(&self, user: &mut AuthorizedUser) -> Result<(), CredentialError> {
        let (token_uri, client_id, client_secret) = match (&user.client_id, &user.client_secret) {
            (Some(id), Some(secret)) => (
                user.token_uri.clone().unwrap_or_else(default_token_uri),
                id.clone(),
                secret.clone(),
            ),
            _ => {
                let client = self.client.as_ref().ok_or(CredentialError::MissingClient)?;
                (
                    client.token_uri.clone(),
                    client.client_id.clone(),
                    client.client_secret.clone(),
                )
            }
        };

        let resp = self
            .http_client
            .post(&token_uri)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Error refreshing token: {:?}", e);
                CredentialError::Refresh(e.to_string())
            })?
            .json::<Value>()
            .await
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;

        let refreshed = parse_refresh_response(resp)?;
        user.token = Some(refreshed.access_token);
        user.expiry = Some(Utc::now() + Duration::seconds(refreshed.expires_in));
        Ok(())
    }

    async fn persist(&self, user: &AuthorizedUser) {
        let written = match serde_json::to_string_pretty(user) {
            Ok(json) => tokio::fs::write(&self.token_path, json)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            tracing::error!("Could not persist refreshed credential: {:?}", e);
        }
    }

    async fn discard(&self, stored: &mut Option<AuthorizedUser>) {
        *stored = None;
        if let Err(e) = tokio::fs::remove_file(&self.token_path).await {
            tracing::warn!(
                "Could not remove {}: {}",
                self.token_path.display(),
                e
            );
        }
    }
}

#[async_trait]
impl AccessTokenSource for GoogleCredentials {
    async fn access_token(&self) -> anyhow::Result<String> {
        if let Some(token) = self
            .stored
            .read()
            .await
            .as_ref()
            .and_then(|u| u.valid_token())
        {
            return Ok(token.to_string());
        }

        let mut stored = self.stored.write().await;
        let Some(user) = stored.as_mut() else {
            return Err(CredentialError::Missing(self.token_path.display().to_string()).into());
        };
        if let Some(token) = user.valid_token() {
            return Ok(token.to_string());
        }

        tracing::info!("Refreshing Google access token");
        match self.refresh(user).await {
            Ok(()) => {
                let user = user.clone();
                self.persist(&user).await;
                user.token
                    .ok_or_else(|| anyhow::anyhow!("refreshed credential has no token"))
            }
            Err(CredentialError::Revoked) => {
                tracing::error!("Google refresh token revoked, discarding stored credential");
                self.discard(&mut stored).await;
                Err(CredentialError::Revoked.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user(token: Option<&str>, expiry: Option<DateTime<Utc>>) -> AuthorizedUser {
        AuthorizedUser {
            token: token.map(str::to_string),
            refresh_token: "1//refresh".to_string(),
            token_uri: None,
            client_id: None,
            client_secret: None,
            expiry,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_valid_token() {
        let fresh = user(Some("ya29.a"), Some(Utc::now() + Duration::hours(1)));
        assert_eq!(fresh.valid_token(), Some("ya29.a"));

        let stale = user(Some("ya29.a"), Some(Utc::now() + Duration::seconds(5)));
        assert_eq!(stale.valid_token(), None);

        assert_eq!(user(Some("ya29.a"), None).valid_token(), Some("ya29.a"));
        assert_eq!(user(None, None).valid_token(), None);
        assert_eq!(user(Some(""), None).valid_token(), None);
    }

    #[test]
    fn test_google_token_file_format() {
        let raw = json!({
            "token": "ya29.a",
            "refresh_token": "1//refresh",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "secret",
            "scopes": ["https://www.googleapis.com/auth/gmail.send"],
            "universe_domain": "googleapis.com",
            "expiry": "2024-08-01T12:34:56.123456Z"
        });
        let parsed: AuthorizedUser = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.client_id.as_deref(), Some("id.apps.googleusercontent.com"));
        assert!(parsed.expiry.is_some());
        assert!(parsed.extra.contains_key("scopes"));

        let written = serde_json::to_value(&parsed).unwrap();
        assert_eq!(written["universe_domain"], "googleapis.com");
        assert_eq!(written["refresh_token"], "1//refresh");
    }

    #[test]
    fn test_refresh_response_classification() {
        let ok = parse_refresh_response(json!({
            "access_token": "ya29.b",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/gmail.send",
            "token_type": "Bearer"
        }))
        .unwrap();
        assert_eq!(ok.access_token, "ya29.b");
        assert_eq!(ok.expires_in, 3599);

        let revoked = parse_refresh_response(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        }));
        assert!(matches!(revoked, Err(CredentialError::Revoked)));

        let other = parse_refresh_response(json!({
            "error": "invalid_client",
            "error_description": "Unauthorized"
        }));
        assert!(matches!(other, Err(CredentialError::Refresh(d)) if d == "Unauthorized"));
    }

    #[tokio::test]
    async fn test_missing_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let creds = GoogleCredentials::load(reqwest::Client::new(), &path, None)
            .await
            .unwrap();

        let err = creds.access_token().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CredentialError>(),
            Some(CredentialError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_valid_stored_token_is_used_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let stored = user(Some("ya29.cached"), Some(Utc::now() + Duration::hours(1)));
        std::fs::write(&path, serde_json::to_string(&stored).unwrap()).unwrap();

        let creds = GoogleCredentials::load(reqwest::Client::new(), &path, None)
            .await
            .unwrap();
        assert_eq!(creds.access_token().await.unwrap(), "ya29.cached");
    }

    #[tokio::test]
    async fn test_expired_token_without_client_cannot_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let stored = user(Some("ya29.old"), Some(Utc::now() - Duration::hours(1)));
        std::fs::write(&path, serde_json::to_string(&stored).unwrap()).unwrap();

        let creds = GoogleCredentials::load(reqwest::Client::new(), &path, None)
            .await
            .unwrap();
        let err = creds.access_token().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<CredentialError>(),
            Some(&CredentialError::MissingClient)
        );
        // nothing is discarded for a configuration problem
        assert!(path.exists());
    }
}
