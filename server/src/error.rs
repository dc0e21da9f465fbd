use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use derive_more::derive::Display;
use lib_email_clients::{DeliveryError, TransportError};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

#[derive(Debug, Display)]
pub enum AppError {
    #[display("invalid id: {_0}")]
    InvalidIdentifier(String),
    #[display("unknown template: {_0}")]
    UnknownTemplate(String),
    #[display("row {_0} has no email address")]
    MissingRecipient(String),
    #[display("{_0}")]
    BadRequest(String),
    #[display("{_0}")]
    NotFound(String),
    #[display("inline assets not found: {}", _0.join(", "))]
    MissingInlineAsset(Vec<String>),
    #[display("template render error ({template}): {message}")]
    Render { template: String, message: String },
    #[display("{_0}")]
    Delivery(DeliveryError),
    #[display("spreadsheet error: {_0}")]
    Upstream(anyhow::Error),
    #[display("google authorization error: {_0}")]
    GoogleAuth(String),
    #[display("{_0}")]
    Internal(anyhow::Error),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<DeliveryError> for AppError {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Terminal(TransportError::Credentials(message)) => {
                AppError::GoogleAuth(message)
            }
            error => AppError::Delivery(error),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidIdentifier(_)
            | AppError::UnknownTemplate(_)
            | AppError::MissingRecipient(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MissingInlineAsset(_)
            | AppError::Render { .. }
            | AppError::GoogleAuth(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Delivery(DeliveryError::Exhausted { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Delivery(DeliveryError::Terminal(_)) | AppError::Upstream(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidIdentifier(_) => "invalid_identifier",
            AppError::UnknownTemplate(_) => "unknown_template",
            AppError::MissingRecipient(_) => "missing_recipient",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::MissingInlineAsset(_) => "missing_inline_asset",
            AppError::Render { .. } => "render_failure",
            AppError::Delivery(DeliveryError::Exhausted { .. }) => "delivery_retries_exhausted",
            AppError::Delivery(DeliveryError::Terminal(_)) => "delivery_failure",
            AppError::Upstream(_) => "upstream",
            AppError::GoogleAuth(_) => "google_auth",
            AppError::Internal(_) => "internal",
        }
    }
}

// This centralizes all different errors from our app in one place
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                "Internal server error".to_string()
            }
            AppError::Upstream(e) => {
                tracing::error!("Spreadsheet error: {:?}", e);
                self.to_string()
            }
            _ => self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!("Error: {} ({})", message, status);
        } else {
            tracing::info!("Rejected request: {} ({})", message, status);
        }

        (
            status,
            Json(json!({
                "error": message,
                "kind": self.kind(),
            })),
        )
            .into_response()
    }
}
