//! Drives the sign-in state machine: listener, browser, exchange, persistence

use std::time::Duration;

use automation_auth::{
    AuthService, AuthorizationRequest, CodeExchange, Error, Result, StoredCredentials,
    exchange_code,
};
use tracing::{debug, info, warn};

use crate::app::App;
use crate::browser::Browser;
use crate::callback::CallbackServer;
use crate::flow::{FlowAction, FlowEvent, FlowState, handle_event};

/// Overall bound on waiting for the user to finish in the browser.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Run the browser sign-in and persist the resulting credentials.
///
/// The callback listener is owned by this function and is shut down (or,
/// on early return, aborted on drop) before it returns.
pub async fn run_login(
    app: &App,
    browser: &dyn Browser,
    timeout: Duration,
) -> Result<StoredCredentials> {
    let config = &app.config;
    let client_id = config
        .google_client_id
        .as_deref()
        .ok_or_else(|| Error::Configuration("GOOGLE_CLIENT_ID not configured".into()))?;
    let auth = app.auth_service()?;

    let request =
        AuthorizationRequest::new(&config.oauth_auth_url, client_id, &config.oauth_redirect_uri)?;
    let server = CallbackServer::start(config.oauth_callback_port, request.state.clone()).await?;
    info!(addr = %server.local_addr(), "waiting for OAuth callback");
    let mut listener = Some(server);

    let mut state = FlowState::Init;
    let mut event = FlowEvent::Started {
        state: request.state.clone(),
        verifier: request.verifier.clone(),
    };

    loop {
        let (next, action) = handle_event(state, event);
        state = next;
        debug!(state = state.name(), "sign-in flow transition");

        event = match action {
            FlowAction::AwaitCallback => {
                open_browser(browser, &request.url);
                let Some(server) = listener.as_mut() else {
                    return Err(Error::Protocol("callback listener is not running".into()));
                };
                match tokio::time::timeout(timeout, server.wait()).await {
                    Ok(Some(params)) => FlowEvent::Callback(params),
                    Ok(None) => {
                        return Err(Error::Protocol(
                            "callback listener stopped before a callback arrived".into(),
                        ));
                    }
                    Err(_) => {
                        warn!(timeout_secs = timeout.as_secs(), "no OAuth callback before deadline");
                        FlowEvent::Timeout
                    }
                }
            }
            FlowAction::StopListener => {
                if let Some(server) = listener.take() {
                    server.shutdown().await;
                }
                FlowEvent::ListenerClosed
            }
            FlowAction::Exchange { code, verifier } => {
                match complete_login(app, &auth, client_id, &code, &verifier).await {
                    Ok(credentials) => FlowEvent::ExchangeSucceeded(Box::new(credentials)),
                    Err(e) => FlowEvent::ExchangeFailed(e),
                }
            }
            FlowAction::Finish => break,
        };
    }

    match state {
        FlowState::Authenticated(credentials) => Ok(*credentials),
        FlowState::ProtocolError(reason) => Err(Error::Protocol(reason)),
        FlowState::TimedOut => Err(Error::Timeout(timeout.as_secs())),
        FlowState::ExchangeFailed(e) => Err(e),
        other => Err(Error::Protocol(format!(
            "sign-in stopped in state {}",
            other.name()
        ))),
    }
}

/// Launch the browser; on failure the URL is printed for manual use.
fn open_browser(browser: &dyn Browser, url: &str) {
    eprintln!("Opening browser for Google authentication...");
    eprintln!("If the browser doesn't open automatically, visit:\n\n  {url}\n");
    if let Err(e) = browser.open(url) {
        warn!(error = %e, "could not launch browser");
        eprintln!("Failed to open browser automatically ({e}). Please visit the URL above.");
    }
}

/// Exchange the code, verify the identity, mint and persist.
async fn complete_login(
    app: &App,
    auth: &AuthService,
    client_id: &str,
    code: &str,
    verifier: &str,
) -> Result<StoredCredentials> {
    let config = &app.config;
    let exchange = CodeExchange {
        token_url: &config.oauth_token_url,
        client_id,
        client_secret: config
            .google_client_secret
            .as_ref()
            .map(|secret| secret.expose().as_str()),
        code,
        redirect_uri: &config.oauth_redirect_uri,
        code_verifier: verifier,
    };
    let tokens = exchange_code(&app.http, &exchange).await?;

    let login = auth.login_with_google(&tokens.id_token).await?;
    let credentials = StoredCredentials::new(
        login.access_token,
        login.expires_in,
        login.user_info,
        tokens.refresh_token,
    )?;
    app.store.save(&credentials).await?;

    info!(email = %credentials.user_info.email, "signed in");
    Ok(credentials)
}
