use std::time::Duration;

use derive_more::derive::Display;

use crate::transport::{MailTransport, SentMessage, TransportError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Exponential backoff: the first retry waits `initial_delay`, every further
/// retry doubles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay
            .checked_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Display)]
pub enum DeliveryError {
    #[display("{_0}")]
    Terminal(TransportError),
    #[display("mail delivery gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: TransportError },
}

impl std::error::Error for DeliveryError {}

/// Wraps a [`MailTransport`] with retry on transient failures.
///
/// A send that the provider accepted but whose response never arrived may be
/// delivered twice, there is no duplicate suppression.
#[derive(Debug, Clone)]
pub struct DeliveryClient<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: MailTransport> DeliveryClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn deliver(&self, raw: &str) -> Result<SentMessage, DeliveryError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.transport.send_raw(raw).await {
                Ok(sent) => {
                    if attempt > 1 {
                        tracing::info!("Message {} accepted on attempt {}", sent.id, attempt);
                    }
                    return Ok(sent);
                }
                Err(error) if !error.is_retryable() => {
                    tracing::error!("Non-retryable send failure: {}", error);
                    return Err(DeliveryError::Terminal(error));
                }
                Err(error) if attempt >= max_attempts => {
                    tracing::error!("Send failed after {} attempts: {}", attempt, error);
                    return Err(DeliveryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                Err(error) => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        "Send attempt {}/{} failed ({}), retrying after {:?}",
                        attempt,
                        max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
