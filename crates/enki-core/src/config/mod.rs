use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::Provider;

/// Root configuration for enki.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct Config {
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
    pub providers: ProvidersConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Get the expanded credential store path.
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }

    /// Get the API base override for a provider, if any.
    pub fn api_base(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.providers.openai.api_base.as_deref(),
            Provider::Anthropic => self.providers.anthropic.api_base.as_deref(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "~/.enki/users.json".to_string(),
        }
    }
}

/// Where a successful registration lands the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RegistrationPolicy {
    /// Back to the login form; the user must sign in with the new account.
    #[default]
    ReturnToLogin,
    /// Straight into the authenticated chat.
    AutoLogin,
}

impl std::str::FromStr for RegistrationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "returntologin" | "login" => Ok(RegistrationPolicy::ReturnToLogin),
            "autologin" | "auto" => Ok(RegistrationPolicy::AutoLogin),
            _ => Err(format!("Unknown registration policy: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub registration_policy: RegistrationPolicy,
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration_policy: RegistrationPolicy::ReturnToLogin,
            min_password_length: 1,
        }
    }
}

/// What to do when the transcript reaches its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum HistoryOverflow {
    #[default]
    EvictOldest,
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    /// Maximum messages kept in the transcript; `None` keeps everything.
    pub limit: Option<usize>,
    pub overflow: HistoryOverflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    pub default_provider: Provider,
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system_prompt: Option<String>,
    pub history: HistoryConfig,
    pub request_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_provider: Provider::OpenAi,
            default_model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            system_prompt: None,
            history: HistoryConfig::default(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct ProviderConfig {
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

/// Load config from environment variables, on top of the config file.
///
/// `ENKI_CONFIG` may hold the full JSON config; otherwise individual
/// variables override single fields.
pub fn load_config_from_env() -> Config {
    if let Ok(json) = std::env::var("ENKI_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => tracing::warn!("Failed to parse ENKI_CONFIG: {}", e),
        }
    }

    let mut config = load_config(None);

    if let Ok(path) = std::env::var("ENKI_STORE_PATH") {
        config.store.path = path;
    }
    if let Ok(host) = std::env::var("ENKI_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("ENKI_PORT") {
        match port.parse() {
            Ok(p) => config.server.port = p,
            Err(_) => tracing::warn!("Ignoring invalid ENKI_PORT: {}", port),
        }
    }
    if let Ok(policy) = std::env::var("ENKI_REGISTRATION_POLICY") {
        match policy.parse() {
            Ok(p) => config.auth.registration_policy = p,
            Err(e) => tracing::warn!("{}", e),
        }
    }
    if let Ok(limit) = std::env::var("ENKI_HISTORY_LIMIT") {
        match limit.parse::<usize>() {
            Ok(0) => config.chat.history.limit = None,
            Ok(n) => config.chat.history.limit = Some(n),
            Err(_) => tracing::warn!("Ignoring invalid ENKI_HISTORY_LIMIT: {}", limit),
        }
    }
    if let Ok(secs) = std::env::var("ENKI_REQUEST_TIMEOUT_SECS") {
        match secs.parse() {
            Ok(s) => config.chat.request_timeout_secs = s,
            Err(_) => tracing::warn!("Ignoring invalid ENKI_REQUEST_TIMEOUT_SECS: {}", secs),
        }
    }
    if let Ok(base) = std::env::var("OPENAI_API_BASE") {
        config.providers.openai.api_base = Some(base);
    }
    if let Ok(base) = std::env::var("ANTHROPIC_API_BASE") {
        config.providers.anthropic.api_base = Some(base);
    }

    config
}

/// Get the default config file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

/// Get the enki data directory.
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".enki")
}

/// Load configuration from file or create default.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> std::result::Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}
