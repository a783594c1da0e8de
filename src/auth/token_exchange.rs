//! Usage: Code-for-credentials exchange through the trusted proxy.
//!
//! The proxy holds the confidential client secret and talks to Notion's token
//! endpoint on our behalf; the desktop client only ever sends the one-time
//! authorization code and the redirect URI it was issued for.

use crate::shared::error::{AuthError, AuthResult};
use crate::shared::security::mask_token;
use crate::store::credentials::CredentialBundle;
use serde_json::{json, Value};

const EXCHANGE_PATH: &str = "/api/token-exchange";
const REFRESH_PATH: &str = "/api/token-refresh";

#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    base_url: String,
    http: reqwest::Client,
}

impl TokenExchangeClient {
    pub fn new(proxy_base_url: impl Into<String>) -> Self {
        Self {
            base_url: proxy_base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Exchange an authorization code for the full credential bundle.
    /// No auto-retry here; retry policy belongs to the caller.
    pub async fn exchange(&self, code: &str, redirect_uri: &str) -> AuthResult<CredentialBundle> {
        let body = json!({ "code": code, "redirect_uri": redirect_uri });
        let response = self.post(EXCHANGE_PATH, &body).await?;

        let bundle: CredentialBundle = response.json().await.map_err(|e| {
            AuthError::Transport(format!("token exchange response json invalid: {e}"))
        })?;
        tracing::info!(
            workspace = %bundle.workspace_name,
            access_token = %mask_token(&bundle.access_token),
            "token exchange succeeded"
        );
        Ok(bundle)
    }

    /// Rotate an access token through the proxy. Kept for long-lived sessions;
    /// Notion public integrations currently hand out non-expiring tokens.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<String> {
        let body = json!({ "refresh_token": refresh_token });
        let response = self.post(REFRESH_PATH, &body).await?;

        let value: Value = response.json().await.map_err(|e| {
            AuthError::Transport(format!("token refresh response json invalid: {e}"))
        })?;
        value
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AuthError::Transport("token refresh response missing access_token".to_string())
            })
    }

    async fn post(&self, path: &str, body: &Value) -> AuthResult<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("proxy request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = extract_proxy_error(&text)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| format!("status {}", status.as_u16()));
        tracing::warn!(status = status.as_u16(), path, "proxy returned error: {message}");
        Err(AuthError::ExchangeFailed {
            status: status.as_u16(),
            message,
        })
    }
}

/// Pull the `error` field out of the proxy's failure body when present.
fn extract_proxy_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
