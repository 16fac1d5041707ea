//! Prometheus metrics exposition
//!
//! - `auth_requests_total` (counter): label `outcome` (`accepted`, `rejected`)
//! - `auth_rejections_total` (counter): label `reason`
//! - `auth_logins_total` (counter): label `outcome`
//! - `auth_login_duration_seconds` (histogram): label `outcome`

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Login calls the provider's key endpoint, so buckets reach into seconds.
const LOGIN_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("auth_login_duration_seconds".to_string()),
            LOGIN_DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record the middleware's decision for one protected request.
pub fn record_auth_request(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    metrics::counter!("auth_requests_total", "outcome" => outcome).increment(1);
}

/// Record why a token was rejected. The reason never reaches the caller.
pub fn record_rejection(reason: &'static str) {
    metrics::counter!("auth_rejections_total", "reason" => reason).increment(1);
}

/// Record a completed login attempt.
pub fn record_login(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("auth_logins_total", "outcome" => outcome).increment(1);
    metrics::histogram!("auth_login_duration_seconds", "outcome" => outcome).record(duration_secs);
}
