//! GCP Automation API server
//!
//! Authentication front of the API:
//! 1. Exchanges a verified Google ID token for an application token
//! 2. Authenticates every protected request with a bearer token
//! 3. Re-issues tokens for already-authenticated callers

mod config;
mod error;
mod metrics;
mod middleware;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use automation_auth::{AuthConfig, AuthContext, AuthService, LoginResponse, VerifiedClaims};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::ApiError;

/// Timeout for calls to Google's key endpoint.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    auth: Arc<AuthService>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    google_id_token: String,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
}

/// Build the axum router with all routes and shared state.
///
/// Routes under `/api/v1/auth/me` and `/api/v1/auth/refresh` pass through
/// `require_auth`; health, metrics and login are public.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let protected = Router::new()
        .route("/api/v1/auth/me", get(me_handler))
        .route("/api/v1/auth/refresh", post(refresh_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.auth.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/auth/login", post(login_handler))
        .merge(protected)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting automation-api");

    let prometheus = metrics::install_recorder()?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let auth_config = AuthConfig::from_env().context("failed to load auth configuration")?;
    if auth_config.google_client_id.is_none() {
        warn!("GOOGLE_CLIENT_ID not set, Google sign-in is disabled");
    }

    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let auth = AuthService::from_config(&auth_config, http)
        .context("failed to initialize authentication")?;

    info!(
        listen_addr = %config.server.listen_addr,
        max_connections = config.server.max_connections,
        production = auth_config.is_production(),
        token_lifetime_hours = auth_config.jwt_expiration_hours,
        "configuration loaded"
    );

    let state = AppState {
        auth: Arc::new(auth),
        prometheus,
        started_at: Instant::now(),
    };
    let app = build_router(state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    // The drain timer starts at signal receipt, not at server start.
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Exchange a Google ID token for an application token.
async fn login_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> std::result::Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let id_token = request.google_id_token.trim();
    if id_token.is_empty() {
        return Err(ApiError::BadRequest("google_id_token is required".into()));
    }

    let started = Instant::now();
    let result = state.auth.login_with_google(id_token).await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(response) => {
            metrics::record_login("success", elapsed);
            Ok(Json(response))
        }
        Err(e) => {
            metrics::record_login("failure", elapsed);
            warn!(error = %e, "login rejected");
            Err(e.into())
        }
    }
}

/// Identity of the authenticated caller.
async fn me_handler(Extension(context): Extension<AuthContext>) -> Json<AuthContext> {
    Json(context)
}

/// Issue a fresh token for the caller's already-validated claims.
async fn refresh_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<VerifiedClaims>,
) -> std::result::Result<Json<RefreshResponse>, ApiError> {
    let tokens = state.auth.tokens();
    let access_token = tokens.refresh(&claims).map_err(|e| {
        error!(error = %e, user_id = %claims.user_id, "token refresh failed");
        ApiError::from(e)
    })?;
    info!(user_id = %claims.user_id, "token refreshed");

    Ok(Json(RefreshResponse {
        access_token,
        token_type: tokens.token_type(),
        expires_in: tokens.lifetime_secs(),
    }))
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A handler that cannot be installed never fires; the other one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
