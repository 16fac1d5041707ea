//! Server-side sign-in: provider ID token in, application token out

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::identity::{GoogleIdTokenVerifier, IdTokenVerifier, ProviderIdentity, verify_identity};
use crate::jwt::TokenService;

/// Issued application token plus the identity it was minted for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until `access_token` expires
    pub expires_in: i64,
    pub user_info: ProviderIdentity,
}

/// Composes the identity verifier and the token service.
pub struct AuthService {
    tokens: TokenService,
    verifier: Arc<dyn IdTokenVerifier>,
    google_auth_enabled: bool,
}

impl AuthService {
    pub fn new(
        tokens: TokenService,
        verifier: Arc<dyn IdTokenVerifier>,
        google_auth_enabled: bool,
    ) -> Self {
        Self {
            tokens,
            verifier,
            google_auth_enabled,
        }
    }

    /// Wire up the Google JWKS verifier and an HMAC token service from config.
    pub fn from_config(config: &AuthConfig, client: reqwest::Client) -> Result<Self> {
        let tokens = TokenService::from_config(config)?;
        let verifier = GoogleIdTokenVerifier::new(
            client,
            config.google_certs_url.clone(),
            config.google_client_id.clone().unwrap_or_default(),
        );
        Ok(Self::new(
            tokens,
            Arc::new(verifier),
            config.enable_google_auth && config.google_client_id.is_some(),
        ))
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Verify a provider ID token and mint an application token for it.
    pub async fn login_with_google(&self, id_token: &str) -> Result<LoginResponse> {
        if !self.google_auth_enabled {
            warn!("Google sign-in attempted while disabled");
            return Err(Error::Configuration(
                "Google authentication is disabled".into(),
            ));
        }

        let identity = verify_identity(self.verifier.as_ref(), id_token).await?;
        let access_token = self.tokens.mint(&identity)?;
        info!(sub = %identity.sub, email = %identity.email, "issued application token");

        Ok(LoginResponse {
            access_token,
            token_type: self.tokens.token_type().to_owned(),
            expires_in: self.tokens.lifetime_secs(),
            user_info: identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::tests::google_claims;
    use crate::testing::FixedClaimsVerifier;
    use common::Secret;
    use serde_json::json;

    fn service(verifier: FixedClaimsVerifier, enabled: bool) -> AuthService {
        AuthService::new(
            TokenService::new(&Secret::new("service-test-secret".into()), 2, false),
            Arc::new(verifier),
            enabled,
        )
    }

    #[tokio::test]
    async fn login_issues_token_for_verified_identity() {
        let service = service(FixedClaimsVerifier::new(google_claims()), true);
        let response = service.login_with_google("id.token.sig").await.unwrap();

        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 2 * 3600);
        assert_eq!(response.user_info.email, "ada@example.com");

        let claims = service.tokens().validate(&response.access_token).unwrap();
        assert_eq!(claims.sub, "110169484474386276334");
    }

    #[tokio::test]
    async fn unverified_email_yields_no_token() {
        let mut claims = google_claims();
        claims["email_verified"] = json!(false);
        let service = service(FixedClaimsVerifier::new(claims), true);
        let err = service.login_with_google("id.token.sig").await.unwrap_err();
        assert!(matches!(err, Error::Verification(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn disabled_google_auth_is_refused() {
        let service = service(FixedClaimsVerifier::new(google_claims()), false);
        let err = service.login_with_google("id.token.sig").await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got {err:?}");
    }

    #[test]
    fn from_config_without_client_id_disables_google_login() {
        let config = AuthConfig::from_lookup(|key| match key {
            "JWT_SECRET" => Some("k".into()),
            _ => None,
        })
        .unwrap();
        let service = AuthService::from_config(&config, reqwest::Client::new()).unwrap();
        assert!(!service.google_auth_enabled);
    }
}
