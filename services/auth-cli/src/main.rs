//! GCP Automation API authentication CLI
//!
//! Signs in with Google in the browser, keeps the resulting application
//! token in `~/.gcp-automation/credentials.json`, and prints or refreshes it
//! for scripts that call the API.

mod app;
mod browser;
mod callback;
mod commands;
mod flow;
mod login;

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use automation_auth::AuthConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::App;
use crate::browser::SystemBrowser;

#[derive(Parser)]
#[command(
    name = "auth-cli",
    version,
    about = "GCP Automation API authentication CLI"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with Google and store credentials locally.
    Login,
    /// Print the current access token.
    Token,
    /// Replace the stored token with one that expires later.
    Refresh,
    /// Show the signed-in user's profile.
    Profile,
    /// Generate a test token (development only).
    TestToken {
        /// User ID for the test token
        #[arg(long)]
        user_id: String,
        /// Email for the test token
        #[arg(long)]
        email: String,
        /// Display name for the test token
        #[arg(long)]
        name: String,
    },
    /// Remove stored credentials.
    Logout,
    /// Show authentication status and remaining token lifetime.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so `auth-cli token` output stays pipeable.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AuthConfig::from_env().context("failed to load configuration")?;
    let app = App::new(config)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Login => commands::login(&app, &SystemBrowser, &mut out).await?,
        Command::Token => commands::token(&app, &mut out).await?,
        Command::Refresh => commands::refresh(&app, &mut out).await?,
        Command::Profile => commands::profile(&app, &mut out).await?,
        Command::TestToken {
            user_id,
            email,
            name,
        } => commands::test_token(&app, &user_id, &email, &name, &mut out).await?,
        Command::Logout => commands::logout(&app, &mut out).await?,
        Command::Status => commands::status(&app, &mut out).await?,
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_token_requires_all_flags() {
        let result = Cli::try_parse_from(["auth-cli", "test-token", "--user-id", "u"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from([
            "auth-cli",
            "test-token",
            "--user-id",
            "test-user-123",
            "--email",
            "test@example.com",
            "--name",
            "Test User",
        ])
        .unwrap();
        match cli.command {
            Command::TestToken {
                user_id,
                email,
                name,
            } => {
                assert_eq!(user_id, "test-user-123");
                assert_eq!(email, "test@example.com");
                assert_eq!(name, "Test User");
            }
            _ => panic!("expected test-token"),
        }
    }

    #[test]
    fn all_commands_parse() {
        for command in ["login", "token", "refresh", "profile", "logout", "status"] {
            assert!(
                Cli::try_parse_from(["auth-cli", command]).is_ok(),
                "{command} should parse"
            );
        }
    }
}
