//! Usage: End-to-end authorization attempt (consent URL, callback, exchange).
//!
//! One attempt at a time, process-wide. The attempt owns the bound listener
//! and the deadline; whichever resolves first wins and the other side is
//! cancelled with it, so there is exactly one terminal resolution and exactly
//! one teardown of the port.

use crate::auth::callback_server::{bind_callback_listener, wait_for_callback, CallbackResult};
use crate::auth::token_exchange::TokenExchangeClient;
use crate::browser::BrowserOpener;
use crate::config::AuthConfig;
use crate::shared::error::{AuthError, AuthResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::generate_state_token;
use crate::store::credentials::CredentialBundle;
use reqwest::Url;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Where the current attempt stands. Purely observational; transitions are
/// driven by `begin` and always end back at `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    Requesting,
    AwaitingCallback,
    Exchanging,
}

pub struct FlowCoordinator {
    config: AuthConfig,
    exchange: TokenExchangeClient,
    browser: Arc<dyn BrowserOpener>,
    in_flight: AtomicBool,
    phase: Mutex<FlowPhase>,
}

/// Releases the single-flight lock and parks the phase back at `Idle` on every
/// exit path, including cancellation and unwind.
struct FlowGuard<'a> {
    coordinator: &'a FlowCoordinator,
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.set_phase(FlowPhase::Idle);
        self.coordinator.in_flight.store(false, Ordering::SeqCst);
    }
}

impl FlowCoordinator {
    pub fn new(config: AuthConfig, browser: Arc<dyn BrowserOpener>) -> Self {
        let exchange = TokenExchangeClient::new(config.proxy_base_url.clone());
        Self {
            config,
            exchange,
            browser,
            in_flight: AtomicBool::new(false),
            phase: Mutex::new(FlowPhase::Idle),
        }
    }

    pub fn phase(&self) -> FlowPhase {
        *self.phase.lock_or_recover()
    }

    /// Run one authorization attempt to completion. Rejects immediately when
    /// another attempt is active; never queues.
    pub async fn begin(&self) -> AuthResult<CredentialBundle> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::info!("authorization attempt rejected: one already in progress");
            return Err(AuthError::AlreadyInProgress);
        }
        let _guard = FlowGuard { coordinator: self };

        self.set_phase(FlowPhase::Requesting);
        let state = generate_state_token();

        let mut listener = bind_callback_listener(&self.config.callback_ports).await?;
        let redirect_uri = listener.redirect_uri();
        let authorize_url = self.build_authorize_url(&redirect_uri, &state)?;

        // Fire and forget: a failed launch is logged, not fatal, because the
        // listener is already up and the user can reach the URL another way.
        if let Err(err) = self.browser.open(authorize_url.as_str()) {
            tracing::warn!("could not open the default browser: {err}");
        }

        self.set_phase(FlowPhase::AwaitingCallback);
        tracing::info!(port = listener.port(), "waiting for authorization callback");

        let callback = tokio::time::timeout(
            self.config.flow_timeout,
            wait_for_callback(&mut listener, &state),
        )
        .await
        .map_err(|_| {
            tracing::info!("authorization attempt timed out");
            AuthError::Timeout
        })??;

        // Terminal response already rendered; free the port before the
        // exchange round trip.
        drop(listener);

        let code = match callback {
            CallbackResult::Success { code } => code,
            CallbackResult::ProviderError(reason) => {
                tracing::info!(reason = %reason, "provider declined authorization");
                return Err(AuthError::ProviderError(reason));
            }
            CallbackResult::StateMismatch => return Err(AuthError::StateMismatch),
            CallbackResult::MissingCode => return Err(AuthError::MissingCode),
        };

        self.set_phase(FlowPhase::Exchanging);
        self.exchange.exchange(&code, &redirect_uri).await
    }

    fn build_authorize_url(&self, redirect_uri: &str, state: &str) -> AuthResult<Url> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| AuthError::Transport(format!("authorize url invalid: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("owner", "user")
            .append_pair("state", state);
        Ok(url)
    }

    fn set_phase(&self, phase: FlowPhase) {
        *self.phase.lock_or_recover() = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    /// Browser stand-in that hands the authorize URL to the test instead of
    /// the OS.
    struct UrlCapture {
        tx: Mutex<Option<oneshot::Sender<String>>>,
    }

    impl UrlCapture {
        fn pair() -> (Arc<Self>, oneshot::Receiver<String>) {
            let (tx, rx) = oneshot::channel();
            (
                Arc::new(Self {
                    tx: Mutex::new(Some(tx)),
                }),
                rx,
            )
        }
    }

    impl BrowserOpener for UrlCapture {
        fn open(&self, url: &str) -> AuthResult<()> {
            if let Some(tx) = self.tx.lock_or_recover().take() {
                let _ = tx.send(url.to_string());
            }
            Ok(())
        }
    }

    fn query_params(url: &str) -> HashMap<String, String> {
        Url::parse(url)
            .expect("url")
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        port
    }

    async fn spawn_proxy_stub(body: &'static str) -> String {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buffer = vec![0u8; 16384];
            let _ = socket.read(&mut buffer).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://127.0.0.1:{port}")
    }

    async fn send_callback(redirect_uri: &str, query: &str) {
        let url = Url::parse(redirect_uri).expect("redirect uri");
        let port = url.port().expect("port");
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
        stream
            .write_all(format!("GET /callback?{query} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .expect("write");
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response).await;
    }

    fn test_config(proxy: &str, timeout: Duration) -> AuthConfig {
        AuthConfig {
            client_id: "client-123".to_string(),
            authorize_url: "https://provider.test/oauth/authorize".to_string(),
            proxy_base_url: proxy.to_string(),
            callback_ports: vec![0],
            flow_timeout: timeout,
        }
    }

    #[tokio::test]
    async fn full_flow_exchanges_the_callback_code() {
        let proxy = spawn_proxy_stub(
            r#"{"access_token":"proxied-token","token_type":"bearer","workspace_id":"ws-1","workspace_name":"Acme","workspace_icon":null,"bot_id":"bot-1"}"#,
        )
        .await;
        let (browser, url_rx) = UrlCapture::pair();
        let coordinator = Arc::new(FlowCoordinator::new(
            test_config(&proxy, Duration::from_secs(5)),
            browser,
        ));

        let flow = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.begin().await })
        };

        let authorize_url = url_rx.await.expect("authorize url");
        let params = query_params(&authorize_url);
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["owner"], "user");
        let state = params["state"].clone();
        assert_eq!(state.len(), 32);

        send_callback(&params["redirect_uri"], &format!("code=abc123&state={state}")).await;

        let bundle = flow.await.expect("join").expect("flow");
        assert_eq!(bundle.access_token, "proxied-token");
        assert_eq!(coordinator.phase(), FlowPhase::Idle);
    }

    #[tokio::test]
    async fn forged_state_resolves_state_mismatch() {
        let (browser, url_rx) = UrlCapture::pair();
        let coordinator = Arc::new(FlowCoordinator::new(
            test_config("http://127.0.0.1:1", Duration::from_secs(5)),
            browser,
        ));

        let flow = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.begin().await })
        };

        let authorize_url = url_rx.await.expect("authorize url");
        let params = query_params(&authorize_url);
        send_callback(&params["redirect_uri"], "code=abc123&state=forged").await;

        let err = flow.await.expect("join").expect_err("should fail");
        assert_eq!(err, AuthError::StateMismatch);
    }

    #[tokio::test]
    async fn provider_error_is_surfaced_verbatim() {
        let (browser, url_rx) = UrlCapture::pair();
        let coordinator = Arc::new(FlowCoordinator::new(
            test_config("http://127.0.0.1:1", Duration::from_secs(5)),
            browser,
        ));

        let flow = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.begin().await })
        };

        let authorize_url = url_rx.await.expect("authorize url");
        let params = query_params(&authorize_url);
        send_callback(&params["redirect_uri"], "error=access_denied").await;

        let err = flow.await.expect("join").expect_err("should fail");
        assert_eq!(err, AuthError::ProviderError("access_denied".to_string()));
    }

    #[tokio::test]
    async fn no_callback_times_out_and_frees_the_port() {
        let port = free_port().await;
        let (browser, _url_rx) = UrlCapture::pair();
        let mut config = test_config("http://127.0.0.1:1", Duration::from_millis(150));
        config.callback_ports = vec![port];
        let coordinator = FlowCoordinator::new(config, browser);

        let err = coordinator.begin().await.expect_err("should time out");
        assert_eq!(err, AuthError::Timeout);
        assert_eq!(coordinator.phase(), FlowPhase::Idle);

        // The port must be immediately reusable for a new attempt.
        TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("port should be free after timeout");
    }

    #[tokio::test]
    async fn occupied_ports_fail_without_opening_the_browser() {
        let busy = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let port = busy.local_addr().expect("addr").port();

        let (browser, mut url_rx) = UrlCapture::pair();
        let mut config = test_config("http://127.0.0.1:1", Duration::from_secs(5));
        config.callback_ports = vec![port];
        let coordinator = FlowCoordinator::new(config, browser);

        let err = coordinator.begin().await.expect_err("should fail");
        assert_eq!(err, AuthError::NoListenerAvailable);
        assert!(url_rx.try_recv().is_err(), "authorize URL must never be opened");
    }

    #[tokio::test]
    async fn second_begin_is_rejected_while_first_is_active() {
        let (browser, url_rx) = UrlCapture::pair();
        let coordinator = Arc::new(FlowCoordinator::new(
            test_config("http://127.0.0.1:1", Duration::from_millis(1500)),
            browser,
        ));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.begin().await })
        };

        // First attempt is live once the authorize URL is out.
        let _ = url_rx.await.expect("authorize url");
        let err = coordinator.begin().await.expect_err("should be rejected");
        assert_eq!(err, AuthError::AlreadyInProgress);

        // After the first attempt ends (timeout) the lock is released.
        let first_err = first.await.expect("join").expect_err("times out");
        assert_eq!(first_err, AuthError::Timeout);
        assert!(!coordinator.in_flight.load(Ordering::SeqCst));
    }

    #[test]
    fn authorize_url_carries_the_bound_redirect_uri() {
        let (browser, _rx) = UrlCapture::pair();
        let coordinator = FlowCoordinator::new(
            test_config("http://127.0.0.1:1", Duration::from_secs(5)),
            browser,
        );
        let url = coordinator
            .build_authorize_url("http://localhost:19874/callback", "st")
            .expect("url");
        let params = query_params(url.as_str());
        assert_eq!(params["redirect_uri"], "http://localhost:19874/callback");
        assert_eq!(params["state"], "st");
    }
}
