//! OAuth state nonce, PKCE pair and authorization URL
//!
//! The state value binds one sign-in attempt to its callback: it is generated
//! when the flow starts, echoed back by Google on the redirect and compared
//! exactly once. PKCE (RFC 7636, S256) rides along so an intercepted code is
//! useless without the verifier that never leaves this process.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::SCOPES;
use crate::error::{Error, Result};

/// Bytes of entropy in a state nonce.
const STATE_BYTES: usize = 32;

/// Bytes of entropy in a PKCE verifier (43-128 chars once encoded).
const VERIFIER_BYTES: usize = 64;

fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Single-use CSRF nonce for one sign-in attempt.
#[derive(Debug, Clone)]
pub struct OAuthState(String);

impl OAuthState {
    /// 32 random bytes, URL-safe base64 without padding (43 characters).
    pub fn generate() -> Self {
        Self(random_url_safe(STATE_BYTES))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison against the value echoed in the callback.
    ///
    /// Runs in time independent of where the first mismatch occurs.
    pub fn matches(&self, received: &str) -> bool {
        let expected = self.0.as_bytes();
        let received = received.as_bytes();
        if expected.len() != received.len() {
            return false;
        }
        expected
            .iter()
            .zip(received)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Generate a cryptographically random PKCE code verifier.
pub fn generate_verifier() -> String {
    random_url_safe(VERIFIER_BYTES)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Everything the flow needs to remember between redirect and callback.
#[derive(Debug)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: OAuthState,
    pub verifier: String,
}

impl AuthorizationRequest {
    /// Generate a fresh state + PKCE pair and build the authorization URL.
    pub fn new(auth_endpoint: &str, client_id: &str, redirect_uri: &str) -> Result<Self> {
        let state = OAuthState::generate();
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        let url = build_authorization_url(
            auth_endpoint,
            client_id,
            redirect_uri,
            state.as_str(),
            &challenge,
        )?;
        Ok(Self {
            url,
            state,
            verifier,
        })
    }
}

/// Build the full authorization URL with all required OAuth parameters.
///
/// `access_type=offline` plus `prompt=consent` makes Google issue a refresh
/// token even for users who have consented before.
pub fn build_authorization_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> Result<String> {
    let mut url = url::Url::parse(auth_endpoint)
        .map_err(|e| Error::Configuration(format!("invalid authorization endpoint: {e}")))?;

    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", SCOPES)
        .append_pair("state", state)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::GOOGLE_AUTHORIZE_ENDPOINT;
    use std::collections::HashMap;

    fn is_url_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn state_has_32_bytes_of_entropy() {
        let state = OAuthState::generate();
        let decoded = URL_SAFE_NO_PAD.decode(state.as_str()).expect("valid base64url");
        assert_eq!(decoded.len(), 32);
        assert_eq!(state.as_str().len(), 43);
        assert!(is_url_safe(state.as_str()), "state: {}", state.as_str());
    }

    #[test]
    fn states_are_unique() {
        let a = OAuthState::generate();
        let b = OAuthState::generate();
        assert_ne!(a.as_str(), b.as_str(), "two states must not collide");
    }

    #[test]
    fn state_matches_only_exact_value() {
        let state = OAuthState::generate();
        let echoed = state.as_str().to_owned();
        assert!(state.matches(&echoed));
        assert!(!state.matches(""));
        assert!(!state.matches(&echoed[1..]));

        let mut tampered = echoed.clone().into_bytes();
        tampered[10] = if tampered[10] == b'A' { b'B' } else { b'A' };
        assert!(!state.matches(std::str::from_utf8(&tampered).unwrap()));
    }

    #[test]
    fn verifier_is_within_rfc_length() {
        let verifier = generate_verifier();
        assert!((43..=128).contains(&verifier.len()), "len {}", verifier.len());
        assert!(is_url_safe(&verifier));
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") = 2cf24dba...9824, base64url encoded
        let challenge = compute_challenge("hello");
        assert_eq!(challenge, "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ");
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let request = AuthorizationRequest::new(
            GOOGLE_AUTHORIZE_ENDPOINT,
            "client-123.apps.googleusercontent.com",
            "http://localhost:8085/callback",
        )
        .unwrap();

        assert!(request.url.starts_with(GOOGLE_AUTHORIZE_ENDPOINT));
        let parsed = url::Url::parse(&request.url).unwrap();
        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();

        assert_eq!(params["client_id"], "client-123.apps.googleusercontent.com");
        assert_eq!(params["redirect_uri"], "http://localhost:8085/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "openid email profile");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["state"], request.state.as_str());
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["code_challenge"], compute_challenge(&request.verifier));
    }

    #[test]
    fn invalid_endpoint_is_configuration_error() {
        let result = build_authorization_url("not a url", "id", "http://localhost", "s", "c");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
