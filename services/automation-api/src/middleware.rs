//! Bearer token authentication for protected routes
//!
//! Looks for the token in the `Authorization: Bearer <token>` header, falling
//! back to the `access_token` query parameter. A valid token attaches an
//! `AuthContext` and the `VerifiedClaims` to the request extensions; anything
//! else gets the uniform 401 from `ApiError::Unauthorized`. The specific
//! rejection reason only goes to logs and metrics.

use std::sync::Arc;

use automation_auth::{AuthContext, AuthService, Error as AuthError};
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::error::ApiError;
use crate::metrics;

/// Query parameter consulted when no `Authorization` header is sent.
pub const QUERY_TOKEN_PARAM: &str = "access_token";

pub async fn require_auth(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request_token(&request);

    match auth.tokens().validate(&token) {
        Ok(claims) => {
            metrics::record_auth_request(true);
            debug!(user_id = %claims.user_id, path = %request.uri().path(), "request authenticated");
            request.extensions_mut().insert(AuthContext::from(&*claims));
            request.extensions_mut().insert(claims);
            Ok(next.run(request).await)
        }
        Err(AuthError::Validation(failure)) => {
            metrics::record_auth_request(false);
            metrics::record_rejection(failure.reason());
            warn!(
                reason = failure.reason(),
                path = %request.uri().path(),
                "rejected request token"
            );
            Err(ApiError::Unauthorized)
        }
        Err(e) => {
            metrics::record_auth_request(false);
            metrics::record_rejection("error");
            warn!(error = %e, path = %request.uri().path(), "token validation error");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Raw token from the header, else the query string; empty when neither is set.
fn request_token(request: &Request) -> String {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default().trim())
        .filter(|value| !value.is_empty());
    if let Some(value) = header {
        return value.to_owned();
    }

    request
        .uri()
        .query()
        .and_then(|query| {
            form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == QUERY_TOKEN_PARAM)
                .map(|(_, value)| value.trim().to_owned())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn header_token_is_used_as_sent() {
        let token = request_token(&request("/api/v1/auth/me", Some("Bearer a.b.c")));
        assert_eq!(token, "Bearer a.b.c");
    }

    #[test]
    fn query_token_is_the_fallback() {
        let token = request_token(&request("/api/v1/auth/me?access_token=a.b.c", None));
        assert_eq!(token, "a.b.c");
    }

    #[test]
    fn header_wins_over_query() {
        let token = request_token(&request(
            "/api/v1/auth/me?access_token=from-query",
            Some("Bearer from-header"),
        ));
        assert_eq!(token, "Bearer from-header");
    }

    #[test]
    fn empty_header_falls_back_to_query() {
        let token = request_token(&request("/me?access_token=q.q.q", Some("  ")));
        assert_eq!(token, "q.q.q");
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let token = request_token(&request("/me?other=1&access_token=a%2Eb.c", None));
        assert_eq!(token, "a.b.c");
    }

    #[test]
    fn no_token_anywhere_is_empty() {
        assert_eq!(request_token(&request("/me?token=nope", None)), "");
        assert_eq!(request_token(&request("/me", None)), "");
    }
}
