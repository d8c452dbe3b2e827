//! HTTP error mapping.
//!
//! Every API failure renders as `{ "error": <kind>, "message"?: <details> }`.
//! Security-sensitive kinds omit the message so signature failures never leak
//! which byte differed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use edgecoder_types::error::{
    AuthError, ChainError, CreditError, GossipError, InputError, ProviderError, ScheduleError,
};
use edgecoder_types::ErrorCode;

/// A renderable API error.
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: Some(message.into()),
        }
    }

    /// An error whose body carries only the kind.
    fn redacted(status: StatusCode, code: &'static str) -> Self {
        Self {
            status,
            code,
            message: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        tracing::error!(target: "gateway", "internal error: {}", message.into());
        Self::redacted(StatusCode::INTERNAL_SERVER_ERROR, "internal")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match &self.message {
            Some(message) => serde_json::json!({ "error": self.code, "message": message }),
            None => serde_json::json!({ "error": self.code }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match &e {
            AuthError::MissingHeader(h) => Self::new(
                StatusCode::BAD_REQUEST,
                e.code(),
                format!("missing header {h}"),
            ),
            // Signature, skew and replay failures are redacted.
            _ => Self::redacted(StatusCode::UNAUTHORIZED, e.code()),
        }
    }
}

impl From<GossipError> for AppError {
    fn from(e: GossipError) -> Self {
        let status = match e {
            GossipError::DuplicateMessage => StatusCode::CONFLICT,
            GossipError::MessageExpired => StatusCode::BAD_REQUEST,
            GossipError::InvalidSignature | GossipError::UnknownSender => StatusCode::UNAUTHORIZED,
        };
        Self::redacted(status, e.code())
    }
}

impl From<CreditError> for AppError {
    fn from(e: CreditError) -> Self {
        let status = match e {
            CreditError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            CreditError::ContributionPolicyViolation { .. } => StatusCode::FORBIDDEN,
            CreditError::DuplicateContributionReport(_) => StatusCode::CONFLICT,
            CreditError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

impl From<ScheduleError> for AppError {
    fn from(e: ScheduleError) -> Self {
        let status = match e {
            ScheduleError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ScheduleError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ScheduleError::NoEligibleAgent(_) => StatusCode::FORBIDDEN,
            ScheduleError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

impl From<ChainError> for AppError {
    fn from(e: ChainError) -> Self {
        let status = match e {
            ChainError::ChainBreak { .. } | ChainError::ChainHeadMismatch => StatusCode::CONFLICT,
            ChainError::CoordinatorSignatureInvalid | ChainError::InvalidSignature { .. } => {
                StatusCode::UNAUTHORIZED
            }
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::redacted(status, e.code())
    }
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, e.code(), e.to_string())
    }
}

impl From<InputError> for AppError {
    fn from(e: InputError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.code(), e.to_string())
    }
}
