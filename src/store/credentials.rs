//! Usage: Credential bundle persistence with best-effort encryption at rest.
//!
//! The bundle is one atomic unit. The write path only ever emits the current
//! format (encrypted when the cipher is available, plaintext otherwise) and
//! deletes superseded records in the same flush. The read path walks a fixed
//! precedence of current and legacy keys; a record that fails to decrypt or
//! parse is treated as absent, never as a fault.

use crate::shared::error::{AuthError, AuthResult};
use crate::store::cipher::SecretCipher;
use crate::store::kv::KvStore;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

const TOKENS_ENCRYPTED_KEY: &str = "oauth_tokens_encrypted";
const TOKENS_PLAIN_KEY: &str = "oauth_tokens";
const LEGACY_TOKEN_ENCRYPTED_KEY: &str = "notion_token_encrypted";
const LEGACY_TOKEN_KEY: &str = "notion_token";
const ALL_KEYS: [&str; 4] = [
    TOKENS_ENCRYPTED_KEY,
    TOKENS_PLAIN_KEY,
    LEGACY_TOKEN_ENCRYPTED_KEY,
    LEGACY_TOKEN_KEY,
];

const STORE_FILE_NAME: &str = "notion-whisper-config.json";

/// Everything a successful exchange hands back. Stored and retrieved as one
/// unit; a retrieved bundle is the caller's exclusive copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub access_token: String,
    pub token_type: String,
    pub workspace_id: String,
    pub workspace_name: String,
    pub workspace_icon: Option<String>,
    pub bot_id: String,
}

impl CredentialBundle {
    /// Bundle synthesized from a pre-workspace-metadata token record.
    fn from_legacy_token(token: String) -> Self {
        Self {
            access_token: token,
            token_type: "bearer".to_string(),
            workspace_id: String::new(),
            workspace_name: String::new(),
            workspace_icon: None,
            bot_id: String::new(),
        }
    }
}

pub struct CredentialStore {
    kv: KvStore,
    cipher: Arc<dyn SecretCipher>,
}

impl CredentialStore {
    /// Open the store in the given data directory with the given cipher.
    pub fn open(data_dir: &Path, cipher: Arc<dyn SecretCipher>) -> AuthResult<Self> {
        let kv = KvStore::open(data_dir.join(STORE_FILE_NAME))?;
        Ok(Self { kv, cipher })
    }

    /// Persist the bundle, encrypted when the primitive is available, and
    /// retire every superseded record in the same write.
    pub fn save(&self, bundle: &CredentialBundle) -> AuthResult<()> {
        let json = serde_json::to_string(bundle)
            .map_err(|e| AuthError::StorageUnavailable(format!("serialize bundle: {e}")))?;

        if self.cipher.is_available() {
            let sealed = self.cipher.encrypt(json.as_bytes())?;
            let encoded = BASE64.encode(sealed);
            self.kv.set_and_remove(
                TOKENS_ENCRYPTED_KEY,
                Value::String(encoded),
                &[TOKENS_PLAIN_KEY, LEGACY_TOKEN_ENCRYPTED_KEY, LEGACY_TOKEN_KEY],
            )?;
            tracing::debug!("credential bundle saved (encrypted)");
        } else {
            self.kv.set_and_remove(
                TOKENS_PLAIN_KEY,
                Value::String(json),
                &[TOKENS_ENCRYPTED_KEY, LEGACY_TOKEN_ENCRYPTED_KEY, LEGACY_TOKEN_KEY],
            )?;
            tracing::debug!("credential bundle saved (plaintext fallback)");
        }
        Ok(())
    }

    /// Walk the precedence chain: current encrypted, current plaintext,
    /// legacy encrypted token, legacy plaintext token. Each level falls
    /// through on any failure.
    pub fn load(&self) -> Option<CredentialBundle> {
        if let Some(bundle) = self.load_encrypted_bundle() {
            return Some(bundle);
        }
        if let Some(bundle) = self.load_plain_bundle() {
            return Some(bundle);
        }
        if let Some(token) = self.load_legacy_encrypted_token() {
            return Some(CredentialBundle::from_legacy_token(token));
        }
        if let Some(token) = self.load_legacy_plain_token() {
            return Some(CredentialBundle::from_legacy_token(token));
        }
        None
    }

    /// Delete every credential record, current and legacy. Idempotent, so
    /// disconnecting twice is harmless.
    pub fn clear(&self) -> AuthResult<()> {
        self.kv.remove_all(&ALL_KEYS)
    }

    fn load_encrypted_bundle(&self) -> Option<CredentialBundle> {
        let encoded = self.string_entry(TOKENS_ENCRYPTED_KEY)?;
        if !self.cipher.is_available() {
            tracing::warn!("encrypted credentials present but cipher unavailable; skipping");
            return None;
        }
        let sealed = BASE64.decode(encoded.as_bytes()).ok()?;
        let json = self.cipher.decrypt(&sealed).ok()?;
        serde_json::from_slice(&json).ok()
    }

    fn load_plain_bundle(&self) -> Option<CredentialBundle> {
        let json = self.string_entry(TOKENS_PLAIN_KEY)?;
        serde_json::from_str(&json).ok()
    }

    fn load_legacy_encrypted_token(&self) -> Option<String> {
        let encoded = self.string_entry(LEGACY_TOKEN_ENCRYPTED_KEY)?;
        if !self.cipher.is_available() {
            return None;
        }
        let sealed = BASE64.decode(encoded.as_bytes()).ok()?;
        let token = self.cipher.decrypt(&sealed).ok()?;
        String::from_utf8(token).ok().filter(|t| !t.is_empty())
    }

    fn load_legacy_plain_token(&self) -> Option<String> {
        self.string_entry(LEGACY_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    fn string_entry(&self, key: &str) -> Option<String> {
        match self.kv.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}
