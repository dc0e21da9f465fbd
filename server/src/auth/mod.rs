pub mod google_credentials;

pub use google_credentials::{CredentialError, GoogleClientConfig, GoogleCredentials};
