//! Usage: One-shot localhost callback listener for the OAuth authorization code flow.
//!
//! Binds the first free port from the registered candidate list, then serves
//! exactly one terminal request on `/callback`. Unknown paths get a 404 and do
//! not consume the attempt; the first recognized callback (success, provider
//! error, bad state, missing code) resolves the attempt and the listener is
//! dropped, freeing the port.

use crate::shared::error::{AuthError, AuthResult};
use crate::shared::security::constant_time_eq;
use reqwest::Url;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub(crate) const CALLBACK_PATH: &str = "/callback";

const SUCCESS_HTML: &str = "<html><body style=\"font-family:system-ui;text-align:center;padding:60px\"><h2>Notion connected</h2><p>You can close this window and return to Notion Whisper.</p></body></html>";
const ERROR_HTML: &str = "<html><body style=\"font-family:system-ui;text-align:center;padding:60px\"><h2>Authorization failed</h2><p>You can close this window and retry.</p></body></html>";
const INVALID_HTML: &str = "<html><body style=\"font-family:system-ui;text-align:center;padding:60px\"><h2>Invalid request</h2></body></html>";
const NOT_FOUND_BODY: &str = "Not found";

/// Terminal outcome of one callback attempt. Produced at most once per bound
/// listener; the timeout path in the coordinator is the only other way an
/// attempt ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallbackResult {
    Success { code: String },
    ProviderError(String),
    StateMismatch,
    MissingCode,
}

#[derive(Debug)]
pub(crate) struct BoundListener {
    port: u16,
    listener: TcpListener,
}

impl BoundListener {
    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI as registered with the provider. The browser resolves
    /// `localhost`; the socket itself only listens on 127.0.0.1.
    pub(crate) fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port, CALLBACK_PATH)
    }
}

/// Try the registered candidate ports in order on the loopback interface and
/// keep the first one that binds.
pub(crate) async fn bind_callback_listener(candidate_ports: &[u16]) -> AuthResult<BoundListener> {
    for &port in candidate_ports {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                // Candidate ports are fixed literals in production; resolving
                // through local_addr keeps dynamic port 0 usable in tests.
                let port = listener
                    .local_addr()
                    .map_err(|e| AuthError::Transport(format!("oauth callback local_addr failed: {e}")))?
                    .port();
                tracing::debug!(port, "oauth callback listener bound");
                return Ok(BoundListener { port, listener });
            }
            Err(err) => {
                tracing::debug!(port, "oauth callback port unavailable: {err}");
            }
        }
    }
    Err(AuthError::NoListenerAvailable)
}

/// Serve connections until one of them is a terminal callback. The caller
/// wraps this in the flow deadline; cancelling the future drops the listener
/// and releases the port, so timeout and callback share one teardown path.
pub(crate) async fn wait_for_callback(
    listener: &mut BoundListener,
    expected_state: &str,
) -> AuthResult<CallbackResult> {
    loop {
        let (socket, _) = listener
            .listener
            .accept()
            .await
            .map_err(|e| AuthError::Transport(format!("oauth callback accept failed: {e}")))?;

        if let Some(result) = handle_connection(socket, listener.port, expected_state).await {
            return Ok(result);
        }
    }
}

/// Returns `Some` only for terminal requests. Stray probes, unknown paths and
/// malformed requests are answered and ignored so they cannot consume the
/// single attempt.
async fn handle_connection(
    mut socket: TcpStream,
    port: u16,
    expected_state: &str,
) -> Option<CallbackResult> {
    let mut buffer = vec![0u8; 8192];
    let size = match socket.read(&mut buffer).await {
        Ok(0) | Err(_) => return None,
        Ok(size) => size,
    };

    let request = String::from_utf8_lossy(&buffer[..size]);
    let target = match extract_request_target(request.as_ref()) {
        Some(target) => target,
        None => {
            respond(&mut socket, "400 Bad Request", "text/html; charset=utf-8", INVALID_HTML)
                .await;
            return None;
        }
    };

    let url = match Url::parse(&format!("http://127.0.0.1:{port}{target}")) {
        Ok(url) => url,
        Err(_) => {
            respond(&mut socket, "400 Bad Request", "text/html; charset=utf-8", INVALID_HTML)
                .await;
            return None;
        }
    };

    if url.path() != CALLBACK_PATH {
        respond(&mut socket, "404 Not Found", "text/plain", NOT_FOUND_BODY).await;
        return None;
    }

    let (result, status, body) = classify_callback(&url, expected_state);
    respond(&mut socket, status, "text/html; charset=utf-8", body).await;
    Some(result)
}

fn classify_callback(
    url: &Url,
    expected_state: &str,
) -> (CallbackResult, &'static str, &'static str) {
    let mut code: Option<String> = None;
    let mut state: Option<String> = None;
    let mut error: Option<String> = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(reason) = error {
        return (CallbackResult::ProviderError(reason), "200 OK", ERROR_HTML);
    }

    let state_matches = state
        .as_deref()
        .is_some_and(|s| constant_time_eq(s.as_bytes(), expected_state.as_bytes()));
    if !state_matches {
        return (CallbackResult::StateMismatch, "400 Bad Request", INVALID_HTML);
    }

    match code {
        Some(code) => (CallbackResult::Success { code }, "200 OK", SUCCESS_HTML),
        None => (CallbackResult::MissingCode, "400 Bad Request", INVALID_HTML),
    }
}

fn extract_request_target(request: &str) -> Option<&str> {
    let first = request.lines().next()?;
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        return None;
    }
    Some(target)
}

async fn respond(socket: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    // Best effort; the authoritative signal travels back through the flow, the
    // browser tab is only a courtesy.
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
