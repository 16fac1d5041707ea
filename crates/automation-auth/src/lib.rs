//! Google sign-in and application token handling for the automation API
//!
//! Shared by `auth-cli` (browser sign-in, local credential file) and
//! `automation-api` (per-request bearer validation).

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod jwt;
pub mod service;
pub mod state;
pub mod token;

pub use config::AuthConfig;
pub use credentials::{CredentialStore, StoredCredentials};
pub use error::{Error, Result, ValidationFailure};
pub use identity::{
    GoogleIdTokenVerifier, IdTokenVerifier, ProviderIdentity, VerifiedPayload, verify_identity,
};
pub use jwt::{AppTokenClaims, AuthContext, TokenService, VerifiedClaims};
pub use service::{AuthService, LoginResponse};
pub use state::{AuthorizationRequest, OAuthState};
pub use token::{CodeExchange, ProviderTokens, exchange_code};

/// Test doubles for crates that depend on this one.
pub mod testing {
    use std::future::Future;
    use std::pin::Pin;

    use crate::error::{Error, Result};
    use crate::identity::{IdTokenVerifier, VerifiedPayload};

    /// Verifier that skips signature checks and returns fixed claims.
    ///
    /// Lets flow and server tests run without a provider key set.
    pub struct FixedClaimsVerifier {
        payload: Option<VerifiedPayload>,
    }

    impl FixedClaimsVerifier {
        pub fn new(claims: serde_json::Value) -> Self {
            let claims = match claims {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            let subject = claims
                .get("sub")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_owned();
            Self {
                payload: Some(VerifiedPayload { subject, claims }),
            }
        }

        /// A verifier that rejects every token.
        pub fn rejecting() -> Self {
            Self { payload: None }
        }
    }

    impl IdTokenVerifier for FixedClaimsVerifier {
        fn verify<'a>(
            &'a self,
            _id_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<VerifiedPayload>> + Send + 'a>> {
            let result = self
                .payload
                .clone()
                .ok_or_else(|| Error::Verification("ID token rejected".into()));
            Box::pin(async move { result })
        }
    }
}
