//! Error types for authentication operations

/// Errors from the sign-in flow, token service and credential store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required settings are missing or invalid; the operation never started.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The OAuth callback violated the protocol (state mismatch, provider
    /// error, missing code).
    #[error("OAuth protocol error: {0}")]
    Protocol(String),

    /// The sign-in flow did not complete in time.
    #[error("authentication timed out after {0} seconds")]
    Timeout(u64),

    /// Network failure, non-2xx status or malformed body from the token endpoint.
    #[error("token exchange failed: {0}")]
    Exchange(String),

    /// The identity provider's token could not be verified or the identity
    /// fails business rules (unverified email).
    #[error("identity verification failed: {0}")]
    Verification(String),

    /// An application token was rejected.
    #[error("token validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    /// File I/O or path-safety failure in the credential store.
    #[error("credential storage error: {0}")]
    Storage(String),

    /// No stored credentials exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A development-only operation was attempted in production mode.
    #[error("test token generation is not allowed in production")]
    ProductionMode,
}

/// Specific reason an application token failed validation.
///
/// Kept for logs and metrics only. HTTP callers always see the same
/// generic rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("token is empty")]
    Missing,

    #[error("token is malformed")]
    Malformed,

    #[error("token has expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("unexpected signing algorithm")]
    WrongAlgorithm,

    #[error("token claims are invalid")]
    InvalidClaims,
}

impl ValidationFailure {
    /// Stable label for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::BadSignature => "bad_signature",
            Self::WrongAlgorithm => "wrong_algorithm",
            Self::InvalidClaims => "invalid_claims",
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
