//! Mail delivery plumbing shared by the trials server.
//!
//! [`transport`] defines the seam between composed messages and whatever
//! actually delivers them, [`delivery`] wraps a transport with bounded
//! exponential backoff, and [`gmail`] is the Gmail API transport.

pub mod delivery;
pub mod gmail;
pub mod transport;

pub use delivery::{DeliveryClient, DeliveryError, RetryPolicy};
pub use transport::{MailTransport, SentMessage, TransportError};
