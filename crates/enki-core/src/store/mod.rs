//! Credential store: user records, password hashes and the cookie settings,
//! persisted as a single JSON document.
//!
//! Layout:
//! ```text
//! { "credentials": { "usernames": { "<user>": { name, email, password, api_keys } } },
//!   "cookie": { name, key, expiry_days } }
//! ```

pub mod backend;
pub mod password;

use std::collections::BTreeMap;
use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AuthError, EnkiError, StoreError};

pub use backend::{FileStoreBackend, MemoryStoreBackend, StoreBackend};

/// One account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Argon2 PHC string, never plaintext.
    pub password: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub api_keys: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub usernames: BTreeMap<String, UserRecord>,
}

/// Settings for the signed session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    pub key: String,
    pub expiry_days: u32,
}

impl Default for CookieConfig {
    fn default() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            name: "enki_chat_app".to_string(),
            key: hex::encode(key),
            expiry_days: 30,
        }
    }
}

/// The full persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub cookie: CookieConfig,
}

impl StoreData {
    fn parse(raw: &str, location: &Path) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            path: location.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn serialize(&self) -> Result<String, StoreError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

/// Fields submitted on the registration form.
///
/// Missing fields read as empty so `validate` can report them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Registration {
    pub username: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: Option<String>,
}

impl Registration {
    pub fn new(
        username: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            name: name.into(),
            email: email.into(),
            password: password.into(),
            password_confirm: None,
        }
    }

    pub fn confirmed(mut self, confirm: impl Into<String>) -> Self {
        self.password_confirm = Some(confirm.into());
        self
    }

    /// Check the submitted fields without touching the store.
    pub fn validate(&self, min_password_length: usize) -> Result<(), AuthError> {
        if self.username.trim().is_empty() {
            return Err(AuthError::Validation("Username is required".into()));
        }
        if self.username.trim().chars().any(char::is_whitespace) {
            return Err(AuthError::Validation("Username must not contain spaces".into()));
        }
        if self.name.trim().is_empty() {
            return Err(AuthError::Validation("Name is required".into()));
        }
        if self.password.is_empty() {
            return Err(AuthError::Validation("Password is required".into()));
        }
        if self.password.chars().count() < min_password_length {
            return Err(AuthError::Validation(format!(
                "Password must be at least {min_password_length} characters"
            )));
        }
        if let Some(confirm) = &self.password_confirm {
            if confirm != &self.password {
                return Err(AuthError::Validation("Passwords do not match".into()));
            }
        }
        Ok(())
    }
}

/// Process-wide owner of the persisted user records.
///
/// Every mutation re-reads the backend, applies the change and rewrites the
/// whole document before the in-memory copy is replaced. Writers in other
/// processes can still interleave; the last write wins.
pub struct CredentialStore {
    data: StoreData,
    backend: Box<dyn StoreBackend>,
    fresh: bool,
}

impl CredentialStore {
    /// Load from a backend. Absent data yields an empty store with generated
    /// cookie settings; data that does not parse is `StoreError::Corrupt`.
    pub fn load(backend: Box<dyn StoreBackend>) -> Result<Self, StoreError> {
        let (data, fresh) = match backend.read()? {
            Some(raw) => (StoreData::parse(&raw, &backend.location())?, false),
            None => {
                info!("No credential store at {}, starting empty", backend.location().display());
                (StoreData::default(), true)
            }
        };
        debug!("Loaded {} user(s) from {}", data.credentials.usernames.len(), backend.location().display());
        Ok(Self { data, backend, fresh })
    }

    /// Load from a file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::load(Box::new(FileStoreBackend::new(path.as_ref())))
    }

    /// An empty store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            data: StoreData::default(),
            backend: Box::new(MemoryStoreBackend::new()),
            fresh: true,
        }
    }

    /// True when nothing was persisted at load time.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn data(&self) -> &StoreData {
        &self.data
    }

    pub fn cookie(&self) -> &CookieConfig {
        &self.data.cookie
    }

    pub fn location(&self) -> std::path::PathBuf {
        self.backend.location()
    }

    pub fn find(&self, username: &str) -> Result<&UserRecord, AuthError> {
        self.data
            .credentials
            .usernames
            .get(username)
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))
    }

    pub fn contains(&self, username: &str) -> bool {
        self.data.credentials.usernames.contains_key(username)
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.data.credentials.usernames.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.credentials.usernames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.credentials.usernames.is_empty()
    }

    /// Check a login attempt against the stored hash.
    pub fn verify_login(&self, username: &str, password: &str) -> Result<&UserRecord, AuthError> {
        let record = self.find(username)?;
        if password::verify_password(password, &record.password) {
            Ok(record)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Pick up changes written by other processes.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        if let Some(raw) = self.backend.read()? {
            self.data = StoreData::parse(&raw, &self.backend.location())?;
            self.fresh = false;
        }
        Ok(())
    }

    /// Validate, hash and insert a new user, then persist.
    pub fn register(
        &mut self,
        registration: &Registration,
        min_password_length: usize,
    ) -> Result<UserRecord, EnkiError> {
        registration.validate(min_password_length)?;
        let username = registration.username.trim().to_string();
        if self.contains(&username) {
            return Err(AuthError::DuplicateUser(username).into());
        }

        let record = UserRecord {
            name: registration.name.trim().to_string(),
            email: registration.email.trim().to_string(),
            password: password::hash_password(&registration.password)?,
            api_keys: BTreeMap::new(),
        };

        let inserted = record.clone();
        self.mutate(|data| {
            if data.credentials.usernames.contains_key(&username) {
                return Err(AuthError::DuplicateUser(username.clone()).into());
            }
            data.credentials.usernames.insert(username.clone(), inserted);
            Ok(())
        })?;

        info!("Registered user {}", username);
        Ok(record)
    }

    /// Apply a change to one user record and persist.
    pub fn update_user<T>(
        &mut self,
        username: &str,
        f: impl FnOnce(&mut UserRecord) -> T,
    ) -> Result<T, EnkiError> {
        self.mutate(|data| {
            let record = data
                .credentials
                .usernames
                .get_mut(username)
                .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
            Ok(f(record))
        })
    }

    /// Write the current contents to the backend.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        self.backend.write(&self.data.serialize()?)?;
        self.fresh = false;
        Ok(())
    }

    fn mutate<T>(
        &mut self,
        f: impl FnOnce(&mut StoreData) -> Result<T, EnkiError>,
    ) -> Result<T, EnkiError> {
        let mut next = match self.backend.read()? {
            Some(raw) => StoreData::parse(&raw, &self.backend.location())?,
            None => self.data.clone(),
        };
        let out = f(&mut next)?;
        if let Err(e) = self.backend.write(&next.serialize()?) {
            warn!("Failed to persist credential store: {}", e);
            return Err(e.into());
        }
        self.data = next;
        self.fresh = false;
        Ok(out)
    }
}
