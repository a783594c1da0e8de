//! Notion connection core for the Notion Whisper tray widget.
//!
//! Covers the full credential lifecycle: the browser consent round trip on a
//! loopback listener, the code-for-token exchange through the trusted proxy
//! (the client secret never ships with the app), and encrypted-at-rest
//! persistence with a plaintext fallback and legacy-format migration. The
//! tray shell embeds [`AuthService`] and listens on its status feed.

mod auth;
mod browser;
mod config;
mod logging;
mod service;
mod shared;
mod store;

pub use auth::flow::{FlowCoordinator, FlowPhase};
pub use auth::token_exchange::TokenExchangeClient;
pub use browser::{BrowserOpener, SystemBrowser};
pub use config::{AuthConfig, FLOW_TIMEOUT, NOTION_CLIENT_ID, OAUTH_AUTHORIZE_URL, OAUTH_PORTS, OAUTH_PROXY_URL};
pub use logging::init as init_logging;
pub use service::{AuthService, ConnectionStatus};
pub use shared::error::{AuthError, AuthResult};
pub use store::cipher::{KeyFileCipher, SecretCipher};
pub use store::credentials::{CredentialBundle, CredentialStore};
