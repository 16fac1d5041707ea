//! Authorization code exchange against the provider token endpoint
//!
//! A single form-encoded POST with `grant_type=authorization_code`. The call
//! is made once: transport failures, non-2xx statuses and unparseable bodies
//! all surface as `Error::Exchange` and end the sign-in attempt.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Response from the provider token endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct ProviderTokens {
    pub access_token: String,
    /// Signed identity assertion, handed to the identity verifier.
    pub id_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Seconds until the provider access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: u64,
    /// Only present when the user granted offline access.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Parameters for one code exchange.
pub struct CodeExchange<'a> {
    pub token_url: &'a str,
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    /// PKCE verifier matching the challenge sent on the authorization URL.
    pub code_verifier: &'a str,
}

/// Exchange an authorization code for provider tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    exchange: &CodeExchange<'_>,
) -> Result<ProviderTokens> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", exchange.code),
        ("client_id", exchange.client_id),
        ("redirect_uri", exchange.redirect_uri),
        ("code_verifier", exchange.code_verifier),
    ];
    if let Some(secret) = exchange.client_secret {
        form.push(("client_secret", secret));
    }

    debug!(token_url = exchange.token_url, "exchanging authorization code");

    let response = client
        .post(exchange.token_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Exchange(format!("token endpoint request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        warn!(%status, "token endpoint rejected authorization code");
        return Err(Error::Exchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let tokens = response
        .json::<ProviderTokens>()
        .await
        .map_err(|e| Error::Exchange(format!("invalid token response: {e}")))?;

    if tokens.id_token.is_empty() {
        return Err(Error::Exchange("token response has an empty id_token".into()));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Form;
    use axum::http::StatusCode;
    use axum::routing::post;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type ReceivedForm = Arc<Mutex<Option<HashMap<String, String>>>>;

    /// Start a mock token endpoint that answers every POST with `status` and
    /// `body`, recording the last form it received.
    async fn start_token_server(status: StatusCode, body: &'static str) -> (String, ReceivedForm) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received: ReceivedForm = Arc::new(Mutex::new(None));
        let recorder = received.clone();

        let app = axum::Router::new().route(
            "/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let recorder = recorder.clone();
                async move {
                    *recorder.lock().unwrap() = Some(form);
                    (status, [("content-type", "application/json")], body)
                }
            }),
        );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/token"), received)
    }

    fn exchange(token_url: &str) -> CodeExchange<'_> {
        CodeExchange {
            token_url,
            client_id: "client-123",
            client_secret: Some("client-secret"),
            code: "auth-code-xyz",
            redirect_uri: "http://localhost:8085/callback",
            code_verifier: "verifier-abc",
        }
    }

    #[test]
    fn provider_tokens_deserialize_without_refresh_token() {
        let json = r#"{"access_token":"ya29.a0","id_token":"eyJ.x.y","token_type":"Bearer","expires_in":3599}"#;
        let tokens: ProviderTokens = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.access_token, "ya29.a0");
        assert_eq!(tokens.id_token, "eyJ.x.y");
        assert_eq!(tokens.expires_in, 3599);
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn successful_exchange_sends_full_form() {
        let (url, received) = start_token_server(
            StatusCode::OK,
            r#"{"access_token":"at","id_token":"id.token.sig","token_type":"Bearer","expires_in":3600,"refresh_token":"1//rt"}"#,
        )
        .await;

        let client = reqwest::Client::new();
        let tokens = exchange_code(&client, &exchange(&url)).await.unwrap();
        assert_eq!(tokens.id_token, "id.token.sig");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//rt"));

        let form = received.lock().unwrap().clone().expect("form recorded");
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "auth-code-xyz");
        assert_eq!(form["client_id"], "client-123");
        assert_eq!(form["client_secret"], "client-secret");
        assert_eq!(form["redirect_uri"], "http://localhost:8085/callback");
        assert_eq!(form["code_verifier"], "verifier-abc");
    }

    #[tokio::test]
    async fn missing_client_secret_is_omitted() {
        let (url, received) = start_token_server(
            StatusCode::OK,
            r#"{"access_token":"at","id_token":"id.token.sig"}"#,
        )
        .await;

        let client = reqwest::Client::new();
        let mut params = exchange(&url);
        params.client_secret = None;
        exchange_code(&client, &params).await.unwrap();

        let form = received.lock().unwrap().clone().expect("form recorded");
        assert!(!form.contains_key("client_secret"));
    }

    #[tokio::test]
    async fn non_success_status_is_exchange_error() {
        let (url, _) = start_token_server(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Bad Request"}"#,
        )
        .await;

        let client = reqwest::Client::new();
        let err = exchange_code(&client, &exchange(&url)).await.unwrap_err();
        match err {
            Error::Exchange(msg) => assert!(msg.contains("invalid_grant"), "got: {msg}"),
            other => panic!("expected Exchange error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_exchange_error() {
        let (url, _) = start_token_server(StatusCode::OK, "<html>not json</html>").await;
        let client = reqwest::Client::new();
        let err = exchange_code(&client, &exchange(&url)).await.unwrap_err();
        assert!(matches!(err, Error::Exchange(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_id_token_is_exchange_error() {
        let (url, _) =
            start_token_server(StatusCode::OK, r#"{"access_token":"at","id_token":""}"#).await;
        let client = reqwest::Client::new();
        let err = exchange_code(&client, &exchange(&url)).await.unwrap_err();
        assert!(matches!(err, Error::Exchange(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_exchange_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("http://{addr}/token");
        let client = reqwest::Client::new();
        let err = exchange_code(&client, &exchange(&url)).await.unwrap_err();
        assert!(matches!(err, Error::Exchange(_)), "got {err:?}");
    }
}
