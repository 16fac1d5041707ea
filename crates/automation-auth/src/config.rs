//! Authentication settings
//!
//! Built once per process from environment variables and passed by reference
//! to everything that needs it. Secrets are wrapped in `Secret` so the struct
//! can be logged with `?config` without leaking them.

use std::path::{Component, Path};

use common::{Secret, env_bool, env_or, env_parse, env_var};

use crate::constants::{
    DEFAULT_CALLBACK_PORT, DEFAULT_CREDENTIALS_DIR, DEFAULT_CREDENTIALS_FILE,
    DEFAULT_JWT_EXPIRATION_HOURS, DEFAULT_REDIRECT_URI, GOOGLE_AUTHORIZE_ENDPOINT,
    GOOGLE_CERTS_ENDPOINT, GOOGLE_TOKEN_ENDPOINT, MAX_JWT_EXPIRATION_HOURS,
    PRODUCTION_ENVIRONMENT,
};

/// Settings shared by the CLI and the API server.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth client id. Sign-in refuses to start without it.
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<Secret<String>>,
    /// HMAC key for application tokens. Only required once a token service
    /// is constructed, so `logout`/`status` work without it.
    pub jwt_secret: Option<Secret<String>>,
    pub jwt_expiration_hours: u64,
    pub oauth_auth_url: String,
    pub oauth_token_url: String,
    pub oauth_redirect_uri: String,
    pub oauth_callback_port: u16,
    pub google_certs_url: String,
    pub credentials_dir: String,
    pub credentials_file: String,
    pub environment: String,
    pub enable_google_auth: bool,
}

impl AuthConfig {
    /// Load from the process environment.
    pub fn from_env() -> common::Result<Self> {
        Self::from_lookup(env_var)
    }

    /// Load from an arbitrary key lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> common::Result<Self> {
        let config = Self {
            google_client_id: lookup("GOOGLE_CLIENT_ID").filter(|v| !v.trim().is_empty()),
            google_client_secret: lookup("GOOGLE_CLIENT_SECRET").and_then(Secret::non_empty),
            jwt_secret: lookup("JWT_SECRET").and_then(Secret::non_empty),
            jwt_expiration_hours: env_parse(
                &lookup,
                "JWT_EXPIRATION_HOURS",
                DEFAULT_JWT_EXPIRATION_HOURS,
            )?,
            oauth_auth_url: env_or(&lookup, "OAUTH_AUTH_URL", GOOGLE_AUTHORIZE_ENDPOINT),
            oauth_token_url: env_or(&lookup, "OAUTH_TOKEN_URL", GOOGLE_TOKEN_ENDPOINT),
            oauth_redirect_uri: env_or(&lookup, "OAUTH_REDIRECT_URI", DEFAULT_REDIRECT_URI),
            oauth_callback_port: env_parse(&lookup, "OAUTH_CALLBACK_PORT", DEFAULT_CALLBACK_PORT)?,
            google_certs_url: env_or(&lookup, "GOOGLE_CERTS_URL", GOOGLE_CERTS_ENDPOINT),
            credentials_dir: env_or(&lookup, "CREDENTIALS_DIR", DEFAULT_CREDENTIALS_DIR),
            credentials_file: env_or(&lookup, "CREDENTIALS_FILE", DEFAULT_CREDENTIALS_FILE),
            environment: env_or(&lookup, "ENVIRONMENT", "development"),
            enable_google_auth: env_bool(&lookup, "ENABLE_GOOGLE_AUTH", true)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.jwt_expiration_hours == 0 {
            return Err(common::Error::Config(
                "JWT_EXPIRATION_HOURS must be greater than 0".into(),
            ));
        }

        if self.jwt_expiration_hours > MAX_JWT_EXPIRATION_HOURS {
            return Err(common::Error::Config(format!(
                "JWT_EXPIRATION_HOURS must be at most {MAX_JWT_EXPIRATION_HOURS}, got {}",
                self.jwt_expiration_hours
            )));
        }

        if self.oauth_callback_port == 0 {
            return Err(common::Error::Config(
                "OAUTH_CALLBACK_PORT must be greater than 0".into(),
            ));
        }

        for (key, value) in [
            ("OAUTH_AUTH_URL", &self.oauth_auth_url),
            ("OAUTH_TOKEN_URL", &self.oauth_token_url),
            ("OAUTH_REDIRECT_URI", &self.oauth_redirect_uri),
            ("GOOGLE_CERTS_URL", &self.google_certs_url),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{key} must start with http:// or https://, got: {value}"
                )));
            }
        }

        if !is_plain_relative(Path::new(&self.credentials_dir)) {
            return Err(common::Error::Config(format!(
                "CREDENTIALS_DIR must be a relative path without '..', got: {}",
                self.credentials_dir
            )));
        }

        let file = Path::new(&self.credentials_file);
        if file.components().count() != 1 || !is_plain_relative(file) {
            return Err(common::Error::Config(format!(
                "CREDENTIALS_FILE must be a bare file name, got: {}",
                self.credentials_file
            )));
        }

        Ok(())
    }

    /// Whether the service runs in production mode (test tokens disabled).
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case(PRODUCTION_ENVIRONMENT)
    }

    /// Application token lifetime in seconds.
    pub fn jwt_lifetime_secs(&self) -> i64 {
        i64::try_from(self.jwt_expiration_hours.saturating_mul(3600)).unwrap_or(i64::MAX)
    }
}

/// True when every component is a normal path segment.
fn is_plain_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
