//! Per-process dependencies, built once in `main` and passed to every command

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use automation_auth::{
    AuthConfig, AuthService, CredentialStore, GoogleIdTokenVerifier, IdTokenVerifier,
    TokenService,
};

/// Timeout for each call to Google (token exchange, key fetch).
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct App {
    pub config: AuthConfig,
    pub store: CredentialStore,
    pub http: reqwest::Client,
    verifier: Arc<dyn IdTokenVerifier>,
}

impl App {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let verifier = Arc::new(GoogleIdTokenVerifier::new(
            http.clone(),
            config.google_certs_url.clone(),
            config.google_client_id.clone().unwrap_or_default(),
        ));
        Ok(Self {
            store: CredentialStore::from_config(&config),
            config,
            http,
            verifier,
        })
    }

    /// Replace the credential store location.
    pub fn with_store(mut self, store: CredentialStore) -> Self {
        self.store = store;
        self
    }

    /// Replace the ID token verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn IdTokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Token service for this configuration; fails without `JWT_SECRET`.
    pub fn token_service(&self) -> automation_auth::Result<TokenService> {
        TokenService::from_config(&self.config)
    }

    pub fn auth_service(&self) -> automation_auth::Result<AuthService> {
        Ok(AuthService::new(
            self.token_service()?,
            self.verifier.clone(),
            self.config.enable_google_auth && self.config.google_client_id.is_some(),
        ))
    }
}
