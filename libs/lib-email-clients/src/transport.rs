use std::sync::Arc;

use async_trait::async_trait;
use derive_more::derive::Display;

/// Identifier the provider assigned to an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: String,
    pub thread_id: Option<String>,
}

/// Classified failure of a single send attempt.
#[derive(Debug, Clone, Display, PartialEq, Eq)]
pub enum TransportError {
    #[display("rate limited by mail provider")]
    RateLimited,
    #[display("mail provider unavailable (status {_0})")]
    ServerUnavailable(u16),
    #[display("mail provider rejected the message (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[display("could not obtain mail credentials: {_0}")]
    Credentials(String),
    #[display("mail transport failed: {_0}")]
    Network(String),
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Maps a non-success HTTP status onto the error taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => TransportError::RateLimited,
            500 | 502 | 503 | 504 => TransportError::ServerUnavailable(status),
            _ => TransportError::Rejected {
                status,
                message: message.into(),
            },
        }
    }

    /// Only rate limiting and server-side unavailability are worth waiting out.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::RateLimited | TransportError::ServerUnavailable(_)
        )
    }
}

/// Sends one fully encoded message (base64url RFC 5322 payload).
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_raw(&self, raw: &str) -> Result<SentMessage, TransportError>;
}

#[async_trait]
impl<T: MailTransport + ?Sized> MailTransport for Arc<T> {
    async fn send_raw(&self, raw: &str) -> Result<SentMessage, TransportError> {
        (**self).send_raw(raw).await
    }
}
