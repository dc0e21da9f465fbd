use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use google_gmail1::api::Message;
use leaky_bucket::RateLimiter;
use serde_json::json;

use super::api_quota::{GMAIL_API_QUOTA, GMAIL_QUOTA_PER_SECOND};
use crate::transport::{MailTransport, SentMessage, TransportError};

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

/// Gmail API error response structure
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiError {
    pub error: GmailApiErrorDetail,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GmailApiErrorDetail {
    pub code: u16,
    pub message: String,
}

/// Supplies a currently valid OAuth access token for the sending account.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<String>;
}

/// [`MailTransport`] over `users.messages.send`.
#[derive(Clone)]
pub struct GmailSender {
    http_client: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    rate_limiter: Arc<RateLimiter>,
}

impl GmailSender {
    pub fn new(http_client: reqwest::Client, tokens: Arc<dyn AccessTokenSource>) -> Self {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(GMAIL_QUOTA_PER_SECOND)
                .interval(Duration::from_secs(1))
                .refill(GMAIL_QUOTA_PER_SECOND)
                .max(GMAIL_QUOTA_PER_SECOND)
                .build(),
        );

        Self {
            http_client,
            tokens,
            rate_limiter,
        }
    }

    /// Address of the authorized account, mostly useful as a startup check.
    pub async fn profile_email(&self) -> anyhow::Result<String> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.get_profile)
            .await;
        let token = self.tokens.access_token().await?;
        let profile = self
            .http_client
            .get(gmail_url!("profile"))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json::<google_gmail1::api::Profile>()
            .await?;

        profile
            .email_address
            .ok_or_else(|| anyhow::anyhow!("Gmail profile has no email address"))
    }
}

#[async_trait]
impl MailTransport for GmailSender {
    async fn send_raw(&self, raw: &str) -> Result<SentMessage, TransportError> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_send)
            .await;

        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| TransportError::Credentials(format!("{e:#}")))?;

        let resp = self
            .http_client
            .post(gmail_url!("messages", "send"))
            .bearer_auth(token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        parse_send_response(status.as_u16(), &body)
    }
}

fn parse_send_response(status: u16, body: &str) -> Result<SentMessage, TransportError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<GmailApiError>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());
        return Err(TransportError::from_status(status, message));
    }

    let message: Message = serde_json::from_str(body)
        .map_err(|e| TransportError::Network(format!("Failed to parse send response: {e}")))?;

    Ok(SentMessage {
        id: message.id.unwrap_or_default(),
        thread_id: message.thread_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gmail_url() {
        let url = gmail_url!("messages", "send");
        assert_eq!(
            url,
            "https://www.googleapis.com/gmail/v1/users/me/messages/send"
        );
    }

    #[test]
    fn test_parse_accepted_message() {
        let sent = parse_send_response(
            200,
            r#"{"id": "18c2f0", "threadId": "18c2f0", "labelIds": ["SENT"]}"#,
        )
        .unwrap();
        assert_eq!(sent.id, "18c2f0");
        assert_eq!(sent.thread_id.as_deref(), Some("18c2f0"));
    }

    #[test]
    fn test_parse_error_bodies() {
        let body = r#"{"error": {"code": 503, "message": "Backend Error", "status": "UNAVAILABLE"}}"#;
        assert_eq!(
            parse_send_response(503, body).unwrap_err(),
            TransportError::ServerUnavailable(503)
        );

        let body = r#"{"error": {"code": 400, "message": "Invalid To header"}}"#;
        assert_eq!(
            parse_send_response(400, body).unwrap_err(),
            TransportError::Rejected {
                status: 400,
                message: "Invalid To header".to_string()
            }
        );

        assert_eq!(
            parse_send_response(429, "slow down").unwrap_err(),
            TransportError::RateLimited
        );
    }
}
