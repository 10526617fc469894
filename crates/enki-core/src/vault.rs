//! Per-user API-key vault.
//!
//! Keys live in each user record under `api_keys.<provider>`. When
//! `ENKI_VAULT_MASTER_KEY` is set, values are sealed with AES-256-GCM under a
//! per-user key derived via HKDF-SHA256 and stored as
//! `enc:v1:<nonce_b64>:<ciphertext_b64>`. Values are never re-sealed on load,
//! so persisting an unchanged store is byte-stable.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::info;

use crate::error::{EnkiError, VaultError};
use crate::store::CredentialStore;
use crate::types::Provider;

const SEALED_PREFIX: &str = "enc:v1:";

/// Reads and writes provider secrets in the credential store.
#[derive(Clone, Default)]
pub struct Vault {
    master_key: Option<[u8; 32]>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("sealed", &self.master_key.is_some())
            .finish()
    }
}

impl Vault {
    /// Vault that stores values as given.
    pub fn plaintext() -> Self {
        Self { master_key: None }
    }

    pub fn with_master_key(master_key: [u8; 32]) -> Self {
        Self {
            master_key: Some(master_key),
        }
    }

    /// Use `ENKI_VAULT_MASTER_KEY` when present. An unset variable means
    /// plaintext; a malformed one is an error.
    pub fn from_env() -> Result<Self, VaultError> {
        match load_master_key() {
            Ok(key) => Ok(Self::with_master_key(key)),
            Err(VaultError::MasterKeyMissing) => Ok(Self::plaintext()),
            Err(e) => Err(e),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.master_key.is_some()
    }

    /// Secret for `(username, provider)`. Empty when the user or the key is
    /// not configured.
    pub fn get(
        &self,
        store: &CredentialStore,
        username: &str,
        provider: Provider,
    ) -> Result<String, VaultError> {
        let Ok(record) = store.find(username) else {
            return Ok(String::new());
        };
        match record.api_keys.get(provider.key()) {
            Some(stored) => self.open(username, stored),
            None => Ok(String::new()),
        }
    }

    /// Set or overwrite a secret and persist the store.
    pub fn set(
        &self,
        store: &mut CredentialStore,
        username: &str,
        provider: Provider,
        secret: &str,
    ) -> Result<(), EnkiError> {
        let value = self.seal(username, secret)?;
        store.update_user(username, |record| {
            record.api_keys.insert(provider.key().to_string(), value);
        })?;
        info!("Updated {} key for {}", provider.display_name(), username);
        Ok(())
    }

    /// Providers the user has a non-empty key for.
    pub fn configured(&self, store: &CredentialStore, username: &str) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| {
                store
                    .find(username)
                    .ok()
                    .and_then(|r| r.api_keys.get(p.key()))
                    .is_some_and(|v| !v.is_empty())
            })
            .collect()
    }

    fn seal(&self, username: &str, secret: &str) -> Result<String, VaultError> {
        match &self.master_key {
            Some(master) if !secret.is_empty() => {
                let key = derive_user_key(master, username);
                let (ciphertext, nonce) = encrypt_field(&key, secret)?;
                Ok(format!("{SEALED_PREFIX}{nonce}:{ciphertext}"))
            }
            _ => Ok(secret.to_string()),
        }
    }

    fn open(&self, username: &str, stored: &str) -> Result<String, VaultError> {
        let Some(sealed) = stored.strip_prefix(SEALED_PREFIX) else {
            return Ok(stored.to_string());
        };
        let master = self.master_key.as_ref().ok_or(VaultError::MasterKeyMissing)?;
        let (nonce, ciphertext) = sealed
            .split_once(':')
            .ok_or_else(|| VaultError::Decryption("malformed sealed value".into()))?;
        decrypt_field(&derive_user_key(master, username), ciphertext, nonce)
    }
}

/// Derive a per-user AES-256 key from the master key.
fn derive_user_key(master_key: &[u8; 32], username: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, master_key);
    let mut okm = [0u8; 32];
    let info = format!("enki-api-keys-{username}");
    hk.expand(info.as_bytes(), &mut okm)
        .expect("HKDF expand should not fail for 32-byte output");
    okm
}

/// Encrypt with AES-256-GCM, returning (ciphertext_b64, nonce_b64).
fn encrypt_field(key: &[u8; 32], plaintext: &str) -> Result<(String, String), VaultError> {
    use aes_gcm::aead::OsRng;
    use aes_gcm::AeadCore;

    let cipher = Aes256Gcm::new(key.into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let b64 = base64::engine::general_purpose::STANDARD;
    Ok((b64.encode(&ciphertext), b64.encode(nonce)))
}

fn decrypt_field(key: &[u8; 32], ciphertext_b64: &str, nonce_b64: &str) -> Result<String, VaultError> {
    let b64 = base64::engine::general_purpose::STANDARD;
    let ciphertext = b64
        .decode(ciphertext_b64)
        .map_err(|e| VaultError::Decryption(format!("base64 ciphertext: {e}")))?;
    let nonce_bytes = b64
        .decode(nonce_b64)
        .map_err(|e| VaultError::Decryption(format!("base64 nonce: {e}")))?;

    if nonce_bytes.len() != 12 {
        return Err(VaultError::Decryption(format!(
            "nonce must be 12 bytes, got {}",
            nonce_bytes.len()
        )));
    }

    let cipher = Aes256Gcm::new(key.into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| VaultError::Decryption(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| VaultError::Decryption(e.to_string()))
}

/// Parse `ENKI_VAULT_MASTER_KEY` (64 hex chars → 32 bytes).
pub fn load_master_key() -> Result<[u8; 32], VaultError> {
    let hex_str = std::env::var("ENKI_VAULT_MASTER_KEY").map_err(|_| VaultError::MasterKeyMissing)?;
    parse_master_key(&hex_str)
}

pub fn parse_master_key(hex_str: &str) -> Result<[u8; 32], VaultError> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(VaultError::MasterKeyInvalid);
    }
    let bytes = hex::decode(hex_str).map_err(|_| VaultError::MasterKeyInvalid)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
