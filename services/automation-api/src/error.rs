//! HTTP error responses
//!
//! Every error leaves the server as `{"error", "message", "code"}` JSON.
//! Token validation failures all collapse to one 401 body so callers cannot
//! tell an expired token from a forged one.

use automation_auth::Error as AuthError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Message of the single 401 response for missing or rejected tokens.
pub const UNAUTHORIZED_MESSAGE: &str = "invalid or missing authentication token";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub code: u16,
}

/// Request-level failures returned by handlers and the auth middleware.
#[derive(Debug)]
pub enum ApiError {
    /// Missing, malformed, expired or otherwise rejected bearer token
    Unauthorized,
    /// Provider ID token failed verification at login
    LoginRejected,
    BadRequest(String),
    /// Sign-in is switched off or not configured on this server
    Unavailable(String),
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::LoginRejected => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let (error, message) = match self {
            Self::Unauthorized => ("unauthorized", UNAUTHORIZED_MESSAGE.to_owned()),
            Self::LoginRejected => ("unauthorized", "Google ID token was rejected".to_owned()),
            Self::BadRequest(message) => ("bad_request", message.clone()),
            Self::Unavailable(message) => ("service_unavailable", message.clone()),
            Self::Internal => ("internal_error", "internal server error".to_owned()),
        };
        ErrorBody {
            error,
            message,
            code: self.status().as_u16(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(_) => Self::Unauthorized,
            AuthError::Verification(_) => Self::LoginRejected,
            AuthError::Configuration(message) => Self::Unavailable(message),
            _ => Self::Internal,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
