use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Failure taxonomy for the gateway.
///
/// Every handler returns `Result<HttpResponse, GatewayError>`; actix maps
/// the error through [`ResponseError`] into a JSON `{"error": message}`
/// body. Nothing is retried.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The decoded gateway path did not yield a parseable absolute URL.
    #[error("malformed target URL: {0}")]
    MalformedTarget(String),

    /// The outbound call to the target failed (network, DNS, TLS, timeout).
    #[error("outbound request failed: {0}")]
    OutboundFetch(String),

    /// A request without the secret prefix could not be mapped back to a
    /// target from either the session cookie or the Referer header.
    #[error("no recoverable target for this request")]
    RecoveryExhausted,

    /// The request country is not in the allow-list.
    #[error("access denied from {0}")]
    GeoDenied(String),

    /// The inbound request body could not be read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// Invalid configuration discovered at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Server-level I/O failure (bind, shutdown).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::MalformedTarget(err.to_string())
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RecoveryExhausted => StatusCode::NOT_FOUND,
            GatewayError::GeoDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::MalformedTarget(_)
            | GatewayError::OutboundFetch(_)
            | GatewayError::BodyRead(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string(),
        }))
    }
}

/// Result type alias using [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;
