//! Google OAuth and application token constants
//!
//! Endpoint URLs here are defaults only; every one of them can be overridden
//! through `AuthConfig` so tests and staging deployments can point at mocks.

/// Google's OAuth 2.0 authorization endpoint
pub const GOOGLE_AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google's token endpoint for authorization code exchange
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Google's published JWKS used to verify ID token signatures
pub const GOOGLE_CERTS_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Issuers Google puts in the `iss` claim of ID tokens.
pub const GOOGLE_ISSUERS: &[&str] = &["accounts.google.com", "https://accounts.google.com"];

/// Identity, email and profile scopes requested on sign-in.
pub const SCOPES: &str = "openid email profile";

/// Default local callback listener port
pub const DEFAULT_CALLBACK_PORT: u16 = 8085;

/// Default redirect URI registered with the Google OAuth client.
///
/// Uses the IPv4 loopback literal because the callback listener binds
/// `127.0.0.1` only; `localhost` may resolve to `::1` first.
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8085/callback";

/// Issuer and audience of application tokens minted by the token service.
pub const APP_TOKEN_ISSUER: &str = "gcp-automation-api";

/// Token type reported to clients and stored with credentials
pub const TOKEN_TYPE: &str = "Bearer";

/// Default application token lifetime
pub const DEFAULT_JWT_EXPIRATION_HOURS: u64 = 24;

/// Upper bound on the application token lifetime (10 years)
pub const MAX_JWT_EXPIRATION_HOURS: u64 = 87_600;

/// Default credentials directory, relative to the user's home directory
pub const DEFAULT_CREDENTIALS_DIR: &str = ".gcp-automation";

/// Default credentials file name inside the credentials directory
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";

/// `ENVIRONMENT` value that turns on production mode
pub const PRODUCTION_ENVIRONMENT: &str = "production";
