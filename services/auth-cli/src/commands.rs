//! Command handlers
//!
//! Each handler writes its user-facing output to `out` so tests can capture
//! it; errors propagate to `main`, which prints them and exits with status 1.

use std::io::Write;

use anyhow::{Context, Result, bail};
use automation_auth::{Error, ProviderIdentity, StoredCredentials};
use chrono::Duration;

use crate::app::App;
use crate::browser::Browser;
use crate::login::{LOGIN_TIMEOUT, run_login};

pub async fn login(app: &App, browser: &dyn Browser, out: &mut impl Write) -> Result<()> {
    let credentials = run_login(app, browser, LOGIN_TIMEOUT).await?;
    let user = &credentials.user_info;
    writeln!(out, "Authentication successful!")?;
    writeln!(out, "Welcome, {} ({})", display_name(user), user.email)?;
    writeln!(
        out,
        "Token expires: {}",
        credentials.expires_at.to_rfc3339()
    )?;
    Ok(())
}

pub async fn token(app: &App, out: &mut impl Write) -> Result<()> {
    let credentials = load_credentials(app).await?;
    if credentials.is_expired() {
        bail!("token has expired. Please run 'auth-cli refresh' or 'auth-cli login'");
    }
    writeln!(out, "{}", credentials.access_token)?;
    Ok(())
}

/// Validate the stored token and replace it with one that expires later.
pub async fn refresh(app: &App, out: &mut impl Write) -> Result<()> {
    let credentials = load_credentials(app).await?;
    let tokens = app.token_service()?;

    let claims = tokens
        .validate(&credentials.access_token)
        .context("stored token cannot be refreshed. Please run 'auth-cli login'")?;
    let access_token = tokens.refresh(&claims)?;

    let refreshed = StoredCredentials::new(
        access_token,
        tokens.lifetime_secs(),
        credentials.user_info,
        credentials.refresh_token,
    )?;
    app.store
        .save(&refreshed)
        .await
        .context("failed to save refreshed credentials")?;

    writeln!(out, "Token refreshed successfully")?;
    writeln!(out, "New expiration: {}", refreshed.expires_at.to_rfc3339())?;
    Ok(())
}

pub async fn profile(app: &App, out: &mut impl Write) -> Result<()> {
    let credentials = load_credentials(app).await?;
    let user = &credentials.user_info;
    writeln!(out, "User Profile:")?;
    writeln!(out, "  Name: {}", user.name)?;
    writeln!(out, "  Email: {}", user.email)?;
    writeln!(out, "  Email verified: {}", user.email_verified)?;
    writeln!(out, "  ID: {}", user.sub)?;
    if !user.picture.is_empty() {
        writeln!(out, "  Picture: {}", user.picture)?;
    }
    if !user.locale.is_empty() {
        writeln!(out, "  Locale: {}", user.locale)?;
    }
    writeln!(
        out,
        "  Token Expires: {}",
        credentials.expires_at.to_rfc3339()
    )?;
    Ok(())
}

/// Mint and store a token for a synthetic identity (development only).
pub async fn test_token(
    app: &App,
    user_id: &str,
    email: &str,
    name: &str,
    out: &mut impl Write,
) -> Result<()> {
    if [user_id, email, name].iter().any(|v| v.trim().is_empty()) {
        bail!("user-id, email, and name are required");
    }

    let tokens = app.token_service()?;
    let access_token = tokens
        .mint_for_testing(user_id, email, name)
        .context("failed to generate test token")?;

    let identity = ProviderIdentity {
        sub: user_id.to_owned(),
        email: email.to_owned(),
        email_verified: true,
        name: name.to_owned(),
        ..ProviderIdentity::default()
    };
    let credentials =
        StoredCredentials::new(access_token, tokens.lifetime_secs(), identity, None)?;
    app.store
        .save(&credentials)
        .await
        .context("failed to save credentials")?;

    writeln!(out, "Test token generated and saved successfully")?;
    writeln!(out, "Token: {}", credentials.access_token)?;
    Ok(())
}

pub async fn logout(app: &App, out: &mut impl Write) -> Result<()> {
    app.store
        .delete()
        .await
        .context("failed to remove credentials")?;
    writeln!(out, "Logged out successfully")?;
    Ok(())
}

/// Report whether stored credentials exist and how long they remain valid.
/// Not being signed in is a normal status, not an error.
pub async fn status(app: &App, out: &mut impl Write) -> Result<()> {
    let credentials = match app.store.load().await {
        Ok(credentials) => credentials,
        Err(Error::NotFound(_)) => {
            writeln!(out, "Status: Not authenticated")?;
            writeln!(out, "Run 'auth-cli login' to authenticate")?;
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to read stored credentials"),
    };

    let user = &credentials.user_info;
    writeln!(out, "Status: Authenticated")?;
    writeln!(out, "User: {} ({})", display_name(user), user.email)?;
    writeln!(out, "Token Type: {}", credentials.token_type)?;
    writeln!(out, "Expires: {}", credentials.expires_at.to_rfc3339())?;
    if credentials.is_expired() {
        writeln!(
            out,
            "Token has expired. Run 'auth-cli refresh' or 'auth-cli login'"
        )?;
    } else {
        writeln!(
            out,
            "Time remaining: {}",
            format_remaining(credentials.remaining())
        )?;
    }
    Ok(())
}

async fn load_credentials(app: &App) -> Result<StoredCredentials> {
    match app.store.load().await {
        Ok(credentials) => Ok(credentials),
        Err(Error::NotFound(_)) => {
            bail!("no valid credentials found. Please run 'auth-cli login' first")
        }
        Err(e) => Err(e).context("failed to read stored credentials"),
    }
}

fn display_name(user: &ProviderIdentity) -> &str {
    if user.name.is_empty() {
        &user.email
    } else {
        &user.name
    }
}

/// `23h 59m`, rounded down to the minute.
fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes();
    format!("{}h {}m", minutes / 60, minutes % 60)
}
