//! Sign-in flow state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `login::run_login` executes the I/O implied by each action.
//!
//! ```text
//! Init -> AwaitingCallback -> CodeReceived -> Exchanging -> Authenticated
//!                          \-> ProtocolError               \-> ExchangeFailed
//!                          \-> TimedOut
//! ```

use automation_auth::{Error, OAuthState, StoredCredentials};
use serde::Deserialize;

/// Query parameters Google appends to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Check a callback against the state generated for this attempt.
///
/// Returns the authorization code, or the reason the callback is rejected.
/// The state is checked first: a mismatched callback is rejected whether or
/// not it carries a code.
pub fn check_callback(expected: &OAuthState, params: &CallbackParams) -> Result<String, String> {
    let received = params.state.as_deref().unwrap_or_default();
    if !expected.matches(received) {
        return Err("state parameter mismatch".into());
    }

    if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
        return Err(match params.error_description.as_deref() {
            Some(description) if !description.is_empty() => {
                format!("provider returned error: {error} ({description})")
            }
            _ => format!("provider returned error: {error}"),
        });
    }

    match params.code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Ok(code.to_owned()),
        _ => Err("no authorization code in callback".into()),
    }
}

/// Flow states.
#[derive(Debug)]
pub enum FlowState {
    Init,
    /// Listener is up and the browser was pointed at the authorization URL
    AwaitingCallback { state: OAuthState, verifier: String },
    /// Valid callback received; listener is being shut down
    CodeReceived { code: String, verifier: String },
    /// Exchanging the code, verifying identity, minting and persisting
    Exchanging,
    Authenticated(Box<StoredCredentials>),
    ProtocolError(String),
    TimedOut,
    ExchangeFailed(Error),
}

impl FlowState {
    /// State name for logs. Never includes tokens or codes.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AwaitingCallback { .. } => "awaiting_callback",
            Self::CodeReceived { .. } => "code_received",
            Self::Exchanging => "exchanging",
            Self::Authenticated(_) => "authenticated",
            Self::ProtocolError(_) => "protocol_error",
            Self::TimedOut => "timed_out",
            Self::ExchangeFailed(_) => "exchange_failed",
        }
    }
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum FlowEvent {
    /// Listener bound; state and PKCE verifier generated
    Started { state: OAuthState, verifier: String },
    /// First request to the callback route
    Callback(CallbackParams),
    /// Overall deadline passed without a callback
    Timeout,
    /// Callback listener has stopped
    ListenerClosed,
    ExchangeSucceeded(Box<StoredCredentials>),
    ExchangeFailed(Error),
}

/// Actions the driver should execute after a transition.
#[derive(Debug, PartialEq, Eq)]
pub enum FlowAction {
    /// Open the browser and wait for the callback (bounded by the timeout)
    AwaitCallback,
    /// Shut down the callback listener
    StopListener,
    /// Exchange the code and finish sign-in
    Exchange { code: String, verifier: String },
    /// Flow is over; read the outcome from the state
    Finish,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: FlowState, event: FlowEvent) -> (FlowState, FlowAction) {
    match (state, event) {
        // --- Init ---
        (FlowState::Init, FlowEvent::Started { state, verifier }) => (
            FlowState::AwaitingCallback { state, verifier },
            FlowAction::AwaitCallback,
        ),

        // --- AwaitingCallback ---
        (FlowState::AwaitingCallback { state, verifier }, FlowEvent::Callback(params)) => {
            match check_callback(&state, &params) {
                Ok(code) => (
                    FlowState::CodeReceived { code, verifier },
                    FlowAction::StopListener,
                ),
                Err(reason) => (FlowState::ProtocolError(reason), FlowAction::StopListener),
            }
        }

        (FlowState::AwaitingCallback { .. }, FlowEvent::Timeout) => {
            (FlowState::TimedOut, FlowAction::StopListener)
        }

        // --- Listener stopped ---
        (FlowState::CodeReceived { code, verifier }, FlowEvent::ListenerClosed) => (
            FlowState::Exchanging,
            FlowAction::Exchange { code, verifier },
        ),

        // --- Exchanging ---
        (FlowState::Exchanging, FlowEvent::ExchangeSucceeded(credentials)) => {
            (FlowState::Authenticated(credentials), FlowAction::Finish)
        }

        (FlowState::Exchanging, FlowEvent::ExchangeFailed(error)) => {
            (FlowState::ExchangeFailed(error), FlowAction::Finish)
        }

        // --- Terminal states and out-of-order events: stop here ---
        (state, _event) => (state, FlowAction::Finish),
    }
}
