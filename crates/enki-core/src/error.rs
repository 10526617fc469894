use std::path::PathBuf;

/// Core error types for enki.
#[derive(Debug, thiserror::Error)]
pub enum EnkiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnkiError {
    /// Message shown to the user at the interaction boundary.
    pub fn user_message(&self) -> String {
        match self {
            EnkiError::Auth(e) => e.user_message(),
            EnkiError::Chat(e) => e.user_message(),
            EnkiError::Provider(e) => e.user_message(),
            EnkiError::Store(StoreError::Corrupt { .. }) => {
                "The account store is unreadable. Contact the administrator.".to_string()
            }
            EnkiError::Store(_) | EnkiError::Io(_) => {
                "Could not save your changes. Please try again.".to_string()
            }
            EnkiError::Vault(_) => "Could not access your stored API keys.".to_string(),
            EnkiError::Config(e) => e.to_string(),
        }
    }

    /// Whether the user can fix the problem by resubmitting.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EnkiError::Store(StoreError::Corrupt { .. }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Credential store at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Password hashing failed: {0}")]
    Hash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("User '{0}' already exists")]
    DuplicateUser(String),

    #[error("User '{0}' not found")]
    UserNotFound(String),

    #[error("Username or password is incorrect")]
    InvalidCredentials,

    #[error("Cannot {event} while {phase}")]
    InvalidTransition { phase: &'static str, event: &'static str },
}

impl AuthError {
    pub fn user_message(&self) -> String {
        match self {
            // Do not reveal which half of the credentials was wrong.
            AuthError::UserNotFound(_) => AuthError::InvalidCredentials.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("ENKI_VAULT_MASTER_KEY is invalid (must be 64 hex chars)")]
    MasterKeyInvalid,

    #[error("Sealed value found but ENKI_VAULT_MASTER_KEY is not set")]
    MasterKeyMissing,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("No response after {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::Api { status: 401, .. } | ProviderError::Api { status: 403, .. } => {
                "The provider rejected your API key.".to_string()
            }
            ProviderError::Api { status: 429, .. } => {
                "The provider is rate limiting requests. Try again shortly.".to_string()
            }
            ProviderError::Api { status, .. } => format!("The provider returned an error ({status})."),
            ProviderError::Http(_) => "Could not reach the provider.".to_string(),
            ProviderError::Timeout(secs) => format!("The provider did not respond within {secs}s."),
            ProviderError::Parse(_) | ProviderError::Other(_) => self.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("No API key configured for {0}")]
    NoApiKey(String),

    #[error("'{0}' is a category, please select a specific model")]
    CategorySelected(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("No model selected")]
    NoModelSelected,

    #[error("Model {model} is not served by {provider}")]
    ProviderMismatch { model: String, provider: String },

    #[error("Model {0} does not accept images")]
    VisionUnsupported(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Transcript is full ({0} messages)")]
    TranscriptFull(usize),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ChatError {
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Provider(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EnkiError>;
