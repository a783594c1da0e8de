//! Usage: OS default-browser launcher behind a seam for tests.

use crate::shared::error::{AuthError, AuthResult};

/// Seam for the consent round trip. The real implementation hands the URL to
/// the OS; tests substitute a driver that performs the callback themselves.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> AuthResult<()>;
}

/// Opens the URL with the platform handler, detached so a slow or chatty
/// handler process can never stall the flow.
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> AuthResult<()> {
        open::that_detached(url)
            .map_err(|e| AuthError::Transport(format!("browser launch failed: {e}")))
    }
}
