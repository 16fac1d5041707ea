//! Local listener for the OAuth redirect
//!
//! Serves `GET /callback` on 127.0.0.1. The first request is handed to the
//! waiting flow through a oneshot channel and answered with a completion or
//! rejection page; later requests are told the attempt is already over.
//! Dropping the server aborts its task, so no listener outlives the flow.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use automation_auth::{Error, OAuthState, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::flow::{CallbackParams, check_callback};

/// Time the browser gets to receive the result page before the listener closes.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on draining open connections during shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct CallbackState {
    expected: OAuthState,
    /// Taken by the first callback; `None` afterwards.
    sender: Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>,
}

/// Running callback listener.
pub struct CallbackServer {
    addr: SocketAddr,
    received: Option<oneshot::Receiver<CallbackParams>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:port` and start serving the callback route.
    pub async fn start(port: u16, expected: OAuthState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            Error::Configuration(format!("cannot listen for the OAuth callback on port {port}: {e}"))
        })?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Configuration(format!("callback listener address: {e}")))?;

        let (callback_tx, callback_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = CallbackState {
            expected,
            sender: Arc::new(Mutex::new(Some(callback_tx))),
        };
        let app = Router::new()
            .route("/callback", get(callback_handler))
            .with_state(state);

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "callback listener failed");
            }
        });

        Ok(Self {
            addr,
            received: Some(callback_rx),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the first callback. `None` if the listener died first or the
    /// callback was already taken.
    pub async fn wait(&mut self) -> Option<CallbackParams> {
        let received = self.received.take()?;
        received.await.ok()
    }

    /// Give the browser a moment to receive its page, then stop the listener
    /// and wait (bounded) for it to drain.
    pub async fn shutdown(mut self) {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
                abort.abort();
                debug!("callback listener did not drain in time, aborted");
            }
        }
        debug!(addr = %self.addr, "callback listener stopped");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn callback_handler(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    let sender = state
        .sender
        .lock()
        .map(|mut guard| guard.take())
        .unwrap_or_default();

    let Some(sender) = sender else {
        return (
            StatusCode::CONFLICT,
            Html(page(
                "Sign-in already handled",
                "This sign-in attempt has already completed. You can close this window.",
            )),
        );
    };

    let verdict = check_callback(&state.expected, &params);
    if sender.send(params).is_err() {
        debug!("sign-in flow stopped waiting before the callback arrived");
    }

    match verdict {
        Ok(_) => (
            StatusCode::OK,
            Html(page(
                "Authentication successful",
                "You are signed in. You can close this window and return to the terminal.",
            )),
        ),
        Err(reason) => {
            warn!(reason = %reason, "rejected OAuth callback");
            (
                StatusCode::BAD_REQUEST,
                Html(page(
                    "Authentication failed",
                    &format!(
                        "Sign-in was rejected: {}. Return to the terminal and try again.",
                        escape(&reason)
                    ),
                )),
            )
        }
    }
}

fn page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body style=\"font-family: sans-serif; text-align: center; padding-top: 4em;\">\n\
         <h1>{title}</h1>\n<p>{message}</p>\n</body>\n</html>\n"
    )
}

/// Minimal HTML escaping for provider-supplied text.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn hit(server: &CallbackServer, query: &str) -> (u16, String) {
        let url = format!("http://{}/callback?{query}", server.local_addr());
        let response = reqwest::get(&url).await.unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    #[tokio::test]
    async fn matching_callback_is_delivered_and_acknowledged() {
        let expected = OAuthState::generate();
        let mut server = CallbackServer::start(0, expected.clone()).await.unwrap();

        let (status, body) = hit(&server, &format!("code=abc&state={}", expected.as_str())).await;
        assert_eq!(status, 200);
        assert!(body.contains("Authentication successful"));

        let params = server.wait().await.expect("callback delivered");
        assert_eq!(params.code.as_deref(), Some("abc"));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn mismatched_state_gets_rejection_page_and_is_still_delivered() {
        let expected = OAuthState::generate();
        let mut server = CallbackServer::start(0, expected).await.unwrap();

        let (status, body) = hit(&server, "code=abc&state=forged").await;
        assert_eq!(status, 400);
        assert!(body.contains("Authentication failed"));
        assert!(body.contains("state parameter mismatch"));

        let params = server.wait().await.expect("callback delivered");
        assert_eq!(params.state.as_deref(), Some("forged"));
    }

    #[tokio::test]
    async fn provider_error_text_is_escaped() {
        let expected = OAuthState::generate();
        let server = CallbackServer::start(0, expected.clone()).await.unwrap();

        let query = format!("error=%3Cscript%3E&state={}", expected.as_str());
        let (status, body) = hit(&server, &query).await;
        assert_eq!(status, 400);
        assert!(!body.contains("<script>"));
        assert!(body.contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn only_first_callback_counts() {
        let expected = OAuthState::generate();
        let mut server = CallbackServer::start(0, expected.clone()).await.unwrap();

        let (first, _) = hit(&server, &format!("code=first&state={}", expected.as_str())).await;
        let (second, body) = hit(&server, &format!("code=second&state={}", expected.as_str())).await;
        assert_eq!(first, 200);
        assert_eq!(second, 409);
        assert!(body.contains("already"));

        let params = server.wait().await.unwrap();
        assert_eq!(params.code.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn shutdown_releases_the_port() {
        let server = CallbackServer::start(0, OAuthState::generate()).await.unwrap();
        let addr = server.local_addr();
        server.shutdown().await;

        let result = reqwest::get(format!("http://{addr}/callback")).await;
        assert!(result.is_err(), "listener must be closed after shutdown");
    }

    #[tokio::test]
    async fn drop_stops_the_listener() {
        let server = CallbackServer::start(0, OAuthState::generate()).await.unwrap();
        let addr = server.local_addr();
        drop(server);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = reqwest::get(format!("http://{addr}/callback")).await;
        assert!(result.is_err(), "listener must be closed after drop");
    }

    #[tokio::test]
    async fn port_in_use_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let result = CallbackServer::start(port, OAuthState::generate()).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn escape_handles_markup() {
        assert_eq!(escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
    }
}
