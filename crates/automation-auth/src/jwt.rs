//! Application token service
//!
//! Mints, validates and refreshes the HMAC-signed JWTs that the API accepts
//! as bearer credentials. Shared by the CLI (login, refresh, test tokens) and
//! the server (per-request validation). Holds no mutable state, so one
//! instance can validate any number of requests concurrently.

use std::ops::Deref;

use chrono::Utc;
use common::Secret;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::constants::{APP_TOKEN_ISSUER, TOKEN_TYPE};
use crate::error::{Error, Result, ValidationFailure};
use crate::identity::ProviderIdentity;

/// Claims embedded in every application token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTokenClaims {
    pub user_id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub picture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub google_sub: String,
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Claims that passed `TokenService::validate`.
///
/// Only `validate` can construct this, so `refresh` can never be handed
/// claims from an unvalidated or expired token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims(AppTokenClaims);

impl VerifiedClaims {
    pub fn into_inner(self) -> AppTokenClaims {
        self.0
    }
}

impl Deref for VerifiedClaims {
    type Target = AppTokenClaims;

    fn deref(&self) -> &AppTokenClaims {
        &self.0
    }
}

/// Caller identity for the duration of one API request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

impl From<&AppTokenClaims> for AuthContext {
    fn from(claims: &AppTokenClaims) -> Self {
        Self {
            user_id: claims.user_id.clone(),
            email: claims.email.clone(),
            name: claims.name.clone(),
        }
    }
}

/// Signs and verifies application tokens with a shared HMAC secret.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime_secs: i64,
    production: bool,
}

impl TokenService {
    pub fn new(secret: &Secret<String>, lifetime_hours: u64, production: bool) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Any HMAC variant is accepted; asymmetric and `none` algorithms are not.
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.set_issuer(&[APP_TOKEN_ISSUER]);
        validation.set_audience(&[APP_TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime_secs: i64::try_from(lifetime_hours.saturating_mul(3600))
                .unwrap_or(i64::MAX),
            production,
        }
    }

    /// Build from config; fails when no signing secret is configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let secret = config
            .jwt_secret
            .as_ref()
            .ok_or_else(|| Error::Configuration("JWT_SECRET not configured".into()))?;
        Ok(Self::new(
            secret,
            config.jwt_expiration_hours,
            config.is_production(),
        ))
    }

    /// Configured token lifetime in seconds.
    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime_secs
    }

    /// Mint a token for a verified provider identity, expiring
    /// `lifetime_hours` from now.
    pub fn mint(&self, identity: &ProviderIdentity) -> Result<String> {
        self.mint_at(identity, Utc::now().timestamp())
    }

    fn mint_at(&self, identity: &ProviderIdentity, now: i64) -> Result<String> {
        let claims = self.claims_for(identity, now);
        let token = self.sign(&claims)?;
        debug!(sub = %claims.sub, exp = claims.exp, "minted application token");
        Ok(token)
    }

    fn claims_for(&self, identity: &ProviderIdentity, now: i64) -> AppTokenClaims {
        AppTokenClaims {
            user_id: identity.sub.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            picture: identity.picture.clone(),
            google_sub: identity.sub.clone(),
            iss: APP_TOKEN_ISSUER.to_owned(),
            sub: identity.sub.clone(),
            aud: vec![APP_TOKEN_ISSUER.to_owned()],
            iat: now,
            nbf: now,
            exp: now.saturating_add(self.lifetime_secs),
        }
    }

    fn sign(&self, claims: &AppTokenClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| Error::Configuration(format!("failed to sign token: {e}")))
    }

    /// Validate a token (optionally prefixed with `Bearer `) and return its claims.
    pub fn validate(&self, token: &str) -> Result<VerifiedClaims> {
        // A bare scheme with no credential counts as missing, not malformed.
        let token = match token.trim() {
            "Bearer" => "",
            token => token.strip_prefix("Bearer ").unwrap_or(token).trim(),
        };
        if token.is_empty() {
            return Err(ValidationFailure::Missing.into());
        }

        let data = decode::<AppTokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| classify(e.kind()))?;

        // The library tolerates `exp == now`; expiry must be strictly in the future.
        if data.claims.exp <= Utc::now().timestamp() {
            return Err(ValidationFailure::Expired.into());
        }

        Ok(VerifiedClaims(data.claims))
    }

    /// Re-mint a token for the same identity with a fresh expiry.
    ///
    /// Performs no expiry check of its own: the claims already passed
    /// `validate`, which is the only way to obtain a `VerifiedClaims`.
    /// Callers holding claims across a long delay should validate again.
    pub fn refresh(&self, claims: &VerifiedClaims) -> Result<String> {
        let identity = ProviderIdentity {
            sub: if claims.google_sub.is_empty() {
                claims.sub.clone()
            } else {
                claims.google_sub.clone()
            },
            email: claims.email.clone(),
            email_verified: true,
            name: claims.name.clone(),
            picture: claims.picture.clone(),
            ..ProviderIdentity::default()
        };
        self.mint(&identity)
    }

    /// Mint a token for a synthetic identity. Development and test use only.
    pub fn mint_for_testing(&self, user_id: &str, email: &str, name: &str) -> Result<String> {
        if self.production {
            warn!(user_id, "refused test token generation in production mode");
            return Err(Error::ProductionMode);
        }

        let identity = ProviderIdentity {
            sub: user_id.to_owned(),
            email: email.to_owned(),
            email_verified: true,
            name: name.to_owned(),
            locale: "en".to_owned(),
            ..ProviderIdentity::default()
        };
        self.mint(&identity)
    }

    /// Whether `claims` are past their expiry at the current time.
    pub fn is_expired(claims: &AppTokenClaims) -> bool {
        claims.exp <= Utc::now().timestamp()
    }

    /// Token type reported alongside minted tokens.
    pub fn token_type(&self) -> &'static str {
        TOKEN_TYPE
    }
}

fn classify(kind: &ErrorKind) -> ValidationFailure {
    match kind {
        ErrorKind::ExpiredSignature => ValidationFailure::Expired,
        ErrorKind::ImmatureSignature => ValidationFailure::NotYetValid,
        ErrorKind::InvalidSignature => ValidationFailure::BadSignature,
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => ValidationFailure::WrongAlgorithm,
        ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::MissingRequiredClaim(_) => ValidationFailure::InvalidClaims,
        _ => ValidationFailure::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn service() -> TokenService {
        TokenService::new(&Secret::new("test-secret-key-for-testing-only".into()), 24, false)
    }

    fn identity() -> ProviderIdentity {
        ProviderIdentity {
            sub: "110169484474386276334".into(),
            email: "ada@example.com".into(),
            email_verified: true,
            name: "Ada Lovelace".into(),
            picture: "https://lh3.googleusercontent.com/a/photo".into(),
            ..ProviderIdentity::default()
        }
    }

    fn validation_failure(result: Result<VerifiedClaims>) -> ValidationFailure {
        match result {
            Err(Error::Validation(failure)) => failure,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn mint_then_validate_round_trips_identity() {
        let service = service();
        let before = Utc::now().timestamp();
        let token = service.mint(&identity()).unwrap();
        let claims = service.validate(&token).unwrap();

        assert_eq!(claims.sub, "110169484474386276334");
        assert_eq!(claims.user_id, "110169484474386276334");
        assert_eq!(claims.google_sub, "110169484474386276334");
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.name, "Ada Lovelace");
        assert_eq!(claims.iss, "gcp-automation-api");
        assert_eq!(claims.aud, vec!["gcp-automation-api".to_string()]);
        assert!(claims.exp >= before + 24 * 3600);
        assert!(claims.exp <= Utc::now().timestamp() + 24 * 3600);
    }

    #[test]
    fn minting_is_deterministic_for_fixed_time() {
        let service = service();
        let now = Utc::now().timestamp();
        let a = service.mint_at(&identity(), now).unwrap();
        let b = service.mint_at(&identity(), now).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        let service = service();
        let token = service.mint(&identity()).unwrap();
        let claims = service.validate(&format!("Bearer {token}")).unwrap();
        assert_eq!(claims.email, "ada@example.com");
    }

    #[test]
    fn expired_token_rejected_despite_valid_signature() {
        let service = service();
        let now = Utc::now().timestamp();
        let mut claims = service.claims_for(&identity(), now - 7200);
        claims.exp = now - 60;
        let token = service.sign(&claims).unwrap();

        assert_eq!(
            validation_failure(service.validate(&token)),
            ValidationFailure::Expired
        );
    }

    #[test]
    fn token_expiring_this_second_is_rejected() {
        let service = service();
        let now = Utc::now().timestamp();
        let mut claims = service.claims_for(&identity(), now - 10);
        claims.exp = now;
        let token = service.sign(&claims).unwrap();
        assert_eq!(
            validation_failure(service.validate(&token)),
            ValidationFailure::Expired
        );
    }

    #[test]
    fn wrong_secret_is_bad_signature() {
        let token = service().mint(&identity()).unwrap();
        let other = TokenService::new(&Secret::new("a-different-secret".into()), 24, false);
        assert_eq!(
            validation_failure(other.validate(&token)),
            ValidationFailure::BadSignature
        );
    }

    #[test]
    fn other_hmac_variants_are_accepted() {
        let service = service();
        let claims = service.claims_for(&identity(), Utc::now().timestamp());
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-testing-only"),
        )
        .unwrap();
        assert!(service.validate(&token).is_ok());
    }

    #[test]
    fn asymmetric_algorithm_header_rejected() {
        let service = service();
        let token = service.mint(&identity()).unwrap();
        let mut parts = token.split('.');
        let (_header, payload, signature) =
            (parts.next().unwrap(), parts.next().unwrap(), parts.next().unwrap());

        let forged_header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let forged = format!("{forged_header}.{payload}.{signature}");
        assert_eq!(
            validation_failure(service.validate(&forged)),
            ValidationFailure::WrongAlgorithm
        );
    }

    #[test]
    fn none_algorithm_rejected() {
        let service = service();
        let token = service.mint(&identity()).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        assert!(service.validate(&format!("{header}.{payload}.")).is_err());
    }

    #[test]
    fn foreign_issuer_rejected() {
        let service = service();
        let mut claims = service.claims_for(&identity(), Utc::now().timestamp());
        claims.iss = "someone-else".into();
        let token = service.sign(&claims).unwrap();
        assert_eq!(
            validation_failure(service.validate(&token)),
            ValidationFailure::InvalidClaims
        );
    }

    #[test]
    fn garbage_and_empty_tokens_rejected() {
        let service = service();
        assert_eq!(
            validation_failure(service.validate("not.a.jwt")),
            ValidationFailure::Malformed
        );
        for empty in ["", "   ", "Bearer ", "Bearer", "  Bearer   "] {
            assert_eq!(
                validation_failure(service.validate(empty)),
                ValidationFailure::Missing,
                "{empty:?}"
            );
        }
    }

    #[test]
    fn refresh_preserves_identity_and_extends_expiry() {
        let service = service();
        let issued_at = Utc::now().timestamp() - 3600;
        let token = service.mint_at(&identity(), issued_at).unwrap();
        let claims = service.validate(&token).unwrap();

        let refreshed = service.refresh(&claims).unwrap();
        let new_claims = service.validate(&refreshed).unwrap();

        assert_eq!(new_claims.sub, claims.sub);
        assert_eq!(new_claims.email, claims.email);
        assert_eq!(new_claims.name, claims.name);
        assert_eq!(new_claims.picture, claims.picture);
        assert!(new_claims.exp > claims.iat);
        assert!(new_claims.exp > claims.exp);
    }

    #[test]
    fn test_tokens_minted_outside_production() {
        let service = service();
        let token = service
            .mint_for_testing("test-user-123", "test@example.com", "Test User")
            .unwrap();
        let claims = service.validate(&token).unwrap();
        assert_eq!(claims.user_id, "test-user-123");
        assert_eq!(claims.email, "test@example.com");
    }

    #[test]
    fn test_tokens_refused_in_production() {
        let service = TokenService::new(&Secret::new("prod-secret".into()), 24, true);
        let result = service.mint_for_testing("u", "u@example.com", "U");
        assert!(matches!(result, Err(Error::ProductionMode)));
    }

    #[test]
    fn from_config_requires_secret() {
        let config = AuthConfig::from_lookup(|_| None).unwrap();
        assert!(matches!(
            TokenService::from_config(&config),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn auth_context_carries_user_fields() {
        let service = service();
        let token = service.mint(&identity()).unwrap();
        let claims = service.validate(&token).unwrap();
        let context = AuthContext::from(&*claims);
        assert_eq!(context.user_id, "110169484474386276334");
        assert_eq!(context.email, "ada@example.com");
        assert_eq!(context.name, "Ada Lovelace");
    }

    #[test]
    fn is_expired_tracks_exp() {
        let service = service();
        let now = Utc::now().timestamp();
        let mut claims = service.claims_for(&identity(), now);
        assert!(!TokenService::is_expired(&claims));
        claims.exp = now - 1;
        assert!(TokenService::is_expired(&claims));
    }
}
