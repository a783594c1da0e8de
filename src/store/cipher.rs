//! Usage: Best-effort secret encryption for credentials at rest.
//!
//! One interface, two interchangeable backends chosen at runtime by a
//! capability probe: AES-256-GCM keyed from a 0600 key file when the key can
//! be provisioned, plaintext fallback when it cannot. Reads tolerate either
//! shape, so a machine that loses the primitive degrades instead of locking
//! the user out.

use crate::shared::error::{AuthError, AuthResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use std::fs;
use std::io::Write;
use std::path::Path;

const KEY_FILE_NAME: &str = ".secret_key";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Platform secret-encryption primitive. `is_available` is the runtime probe;
/// when it returns false the store writes plaintext and records that fact by
/// which key it writes under.
pub trait SecretCipher: Send + Sync {
    fn is_available(&self) -> bool;
    fn encrypt(&self, plaintext: &[u8]) -> AuthResult<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> AuthResult<Vec<u8>>;
}

/// AES-256-GCM with a random key provisioned next to the store file. The
/// nonce is prepended to each ciphertext.
pub struct KeyFileCipher {
    key: Option<[u8; KEY_LEN]>,
}

impl KeyFileCipher {
    /// Probe the data directory: load the key file, or create it on first
    /// run. Any failure yields an unavailable cipher, not an error; missing
    /// platform encryption is an expected condition.
    pub fn probe(data_dir: &Path) -> Self {
        match get_or_create_key(data_dir) {
            Ok(key) => Self { key: Some(key) },
            Err(err) => {
                tracing::warn!(
                    dir = %data_dir.display(),
                    "secret key unavailable; credentials will be stored in plaintext: {err}"
                );
                Self { key: None }
            }
        }
    }

    /// An always-unavailable cipher, forcing the plaintext path.
    pub fn unavailable() -> Self {
        Self { key: None }
    }

    fn cipher(&self) -> AuthResult<Aes256Gcm> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| AuthError::StorageUnavailable("encryption key missing".to_string()))?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
    }
}

impl SecretCipher for KeyFileCipher {
    fn is_available(&self) -> bool {
        self.key.is_some()
    }

    fn encrypt(&self, plaintext: &[u8]) -> AuthResult<Vec<u8>> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| AuthError::StorageUnavailable("encryption failed".to_string()))?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> AuthResult<Vec<u8>> {
        let cipher = self.cipher()?;

        if ciphertext.len() < NONCE_LEN {
            return Err(AuthError::StorageUnavailable(
                "ciphertext too short".to_string(),
            ));
        }

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_LEN]);
        cipher
            .decrypt(nonce, &ciphertext[NONCE_LEN..])
            .map_err(|_| AuthError::StorageUnavailable("decryption failed".to_string()))
    }
}

fn get_or_create_key(data_dir: &Path) -> std::io::Result<[u8; KEY_LEN]> {
    fs::create_dir_all(data_dir)?;
    let path = data_dir.join(KEY_FILE_NAME);

    if path.exists() {
        let bytes = fs::read(&path)?;
        if bytes.len() == KEY_LEN {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&bytes);
            return Ok(key);
        }
        tracing::warn!(path = %path.display(), "secret key file has wrong length; regenerating");
    }

    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);

    let mut file = fs::File::create(&path)?;
    file.write_all(&key)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&path, perms)?;
    }

    Ok(key)
}
