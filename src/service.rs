//! Usage: Application-facing connection surface for the tray shell.
//!
//! Wraps the flow coordinator and the credential store behind the three
//! operations the UI knows about (connect, status, disconnect) and fans
//! status changes out to every subscribed surface.

use crate::auth::flow::{FlowCoordinator, FlowPhase};
use crate::browser::{BrowserOpener, SystemBrowser};
use crate::config::AuthConfig;
use crate::shared::error::{AuthError, AuthResult};
use crate::store::cipher::KeyFileCipher;
use crate::store::credentials::{CredentialBundle, CredentialStore};
use directories::ProjectDirs;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

const STATUS_CHANNEL_CAPACITY: usize = 16;

/// What the UI gets to know: connected or not, plus workspace display fields.
/// The token itself never crosses this surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub workspace_name: Option<String>,
    pub workspace_icon: Option<String>,
}

impl ConnectionStatus {
    fn disconnected() -> Self {
        Self {
            connected: false,
            workspace_name: None,
            workspace_icon: None,
        }
    }

    fn from_bundle(bundle: &CredentialBundle) -> Self {
        Self {
            connected: true,
            workspace_name: Some(bundle.workspace_name.clone()),
            workspace_icon: bundle.workspace_icon.clone(),
        }
    }
}

pub struct AuthService {
    coordinator: FlowCoordinator,
    store: CredentialStore,
    events: broadcast::Sender<ConnectionStatus>,
}

impl AuthService {
    pub fn new(config: AuthConfig, store: CredentialStore, browser: Arc<dyn BrowserOpener>) -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            coordinator: FlowCoordinator::new(config, browser),
            store,
            events,
        }
    }

    /// Production wiring: platform data dir, key-file cipher probe, OS browser.
    pub fn open_default() -> AuthResult<Self> {
        let dirs = ProjectDirs::from("com", "notion-whisper", "notion-whisper").ok_or_else(|| {
            AuthError::StorageUnavailable("could not determine the platform data directory".to_string())
        })?;
        let data_dir = dirs.data_dir();
        let cipher = Arc::new(KeyFileCipher::probe(data_dir));
        let store = CredentialStore::open(data_dir, cipher)?;
        Ok(Self::new(AuthConfig::default(), store, Arc::new(SystemBrowser)))
    }

    /// Run one full connect attempt: consent, callback, exchange, persist.
    /// Failures persist nothing and the previous connection state survives.
    pub async fn start_flow(&self) -> AuthResult<ConnectionStatus> {
        let bundle = self.coordinator.begin().await?;
        self.store.save(&bundle)?;

        let status = ConnectionStatus::from_bundle(&bundle);
        tracing::info!(workspace = %bundle.workspace_name, "workspace connected");
        self.broadcast(status.clone());
        Ok(status)
    }

    /// Current connection state, derived from the store. Storage faults
    /// degrade to "not connected" rather than surfacing.
    pub fn status(&self) -> ConnectionStatus {
        match self.store.load() {
            Some(bundle) => ConnectionStatus::from_bundle(&bundle),
            None => ConnectionStatus::disconnected(),
        }
    }

    /// Token accessor for the data-fetch path. `None` means not connected.
    pub fn access_token(&self) -> Option<String> {
        self.store.load().map(|bundle| bundle.access_token)
    }

    /// Drop the stored credentials. Safe to call repeatedly.
    pub fn disconnect(&self) -> AuthResult<()> {
        self.store.clear()?;
        tracing::info!("workspace disconnected");
        self.broadcast(ConnectionStatus::disconnected());
        Ok(())
    }

    /// Status-changed feed for UI surfaces; every open window subscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.events.subscribe()
    }

    pub fn flow_phase(&self) -> FlowPhase {
        self.coordinator.phase()
    }

    fn broadcast(&self, status: ConnectionStatus) {
        // No subscribers is fine; the tray may not have any window open.
        let _ = self.events.send(status);
    }
}
