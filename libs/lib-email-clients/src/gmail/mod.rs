pub mod api_quota;
mod sender;

pub use sender::{AccessTokenSource, GmailApiError, GmailSender};
