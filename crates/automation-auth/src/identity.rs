//! Identity verification of provider ID tokens
//!
//! Signature, audience and issuer checks belong to the provider's published
//! mechanism and sit behind the `IdTokenVerifier` trait. What this module owns
//! is turning the verified, untyped claim payload into a `ProviderIdentity`
//! and enforcing the business rules on it: the email must be present and
//! verified by the provider.

use std::future::Future;
use std::pin::Pin;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::constants::GOOGLE_ISSUERS;
use crate::error::{Error, Result};

/// Verified identity asserted by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Provider subject id (stable per Google account)
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub locale: String,
}

/// Claim payload of an ID token whose signature and audience were verified.
#[derive(Debug, Clone, Default)]
pub struct VerifiedPayload {
    pub subject: String,
    pub claims: Map<String, Value>,
}

/// The provider's token verification mechanism.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn IdTokenVerifier>`).
pub trait IdTokenVerifier: Send + Sync {
    /// Verify signature, audience, issuer and expiry of `id_token`.
    fn verify<'a>(
        &'a self,
        id_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<VerifiedPayload>> + Send + 'a>>;
}

/// Verify `id_token` and extract a `ProviderIdentity` from it.
pub async fn verify_identity(
    verifier: &dyn IdTokenVerifier,
    id_token: &str,
) -> Result<ProviderIdentity> {
    let payload = verifier.verify(id_token).await?;
    let identity = identity_from_payload(&payload)?;
    info!(sub = %identity.sub, email = %identity.email, "provider identity verified");
    Ok(identity)
}

/// Read a string claim, defaulting to empty on absence or type mismatch.
fn claim_str(claims: &Map<String, Value>, key: &str) -> String {
    claims
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Read a boolean claim, defaulting to false on absence or type mismatch.
fn claim_bool(claims: &Map<String, Value>, key: &str) -> bool {
    claims.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Build a `ProviderIdentity` from a verified payload and enforce the
/// email rules.
pub fn identity_from_payload(payload: &VerifiedPayload) -> Result<ProviderIdentity> {
    let claims = &payload.claims;
    let sub = if payload.subject.is_empty() {
        claim_str(claims, "sub")
    } else {
        payload.subject.clone()
    };

    let identity = ProviderIdentity {
        sub,
        email: claim_str(claims, "email"),
        email_verified: claim_bool(claims, "email_verified"),
        name: claim_str(claims, "name"),
        given_name: claim_str(claims, "given_name"),
        family_name: claim_str(claims, "family_name"),
        picture: claim_str(claims, "picture"),
        locale: claim_str(claims, "locale"),
    };

    if identity.sub.is_empty() {
        return Err(Error::Verification("subject not found in ID token".into()));
    }

    if identity.email.is_empty() {
        return Err(Error::Verification("email not found in ID token".into()));
    }

    if !identity.email_verified {
        return Err(Error::Verification(
            "Google account email not verified".into(),
        ));
    }

    Ok(identity)
}

/// Verifies Google ID tokens against Google's published JWKS.
///
/// Keys are fetched per verification; sign-in is a rare, single-attempt
/// operation and Google rotates keys without notice.
pub struct GoogleIdTokenVerifier {
    client: reqwest::Client,
    certs_url: String,
    client_id: String,
}

impl GoogleIdTokenVerifier {
    pub fn new(client: reqwest::Client, certs_url: String, client_id: String) -> Self {
        Self {
            client,
            certs_url,
            client_id,
        }
    }

    async fn fetch_keys(&self) -> Result<JwkSet> {
        let response = self
            .client
            .get(&self.certs_url)
            .send()
            .await
            .map_err(|e| Error::Verification(format!("fetching provider keys failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Verification(format!(
                "provider key endpoint returned {status}"
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::Verification(format!("invalid provider key set: {e}")))
    }

    async fn verify_token(&self, id_token: &str) -> Result<VerifiedPayload> {
        let header = decode_header(id_token)
            .map_err(|e| Error::Verification(format!("malformed ID token: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(Error::Verification(format!(
                "unexpected ID token algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::Verification("ID token header has no key id".into()))?;

        let keys = self.fetch_keys().await?;
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| Error::Verification(format!("no provider key matches kid {kid}")))?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| Error::Verification(format!("unusable provider key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(GOOGLE_ISSUERS);

        let data = decode::<Map<String, Value>>(id_token, &key, &validation)
            .map_err(|e| Error::Verification(format!("ID token rejected: {e}")))?;

        debug!(kid, "ID token signature verified");
        Ok(VerifiedPayload {
            subject: claim_str(&data.claims, "sub"),
            claims: data.claims,
        })
    }
}

impl IdTokenVerifier for GoogleIdTokenVerifier {
    fn verify<'a>(
        &'a self,
        id_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<VerifiedPayload>> + Send + 'a>> {
        Box::pin(self.verify_token(id_token))
    }
}
