//! Configuration loading and validation for convoke.
//!
//! Loads configuration from `~/.convoke/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variables consulted for provider-specific API keys.
const PROVIDER_KEY_VARS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
];

/// The root configuration structure.
///
/// Maps directly to `~/.convoke/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the selected provider, unless its section sets one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Backend: `openai`, `openrouter`, `anthropic`, `ollama`, or the name of
    /// a `[providers.<name>]` section with an OpenAI-compatible `api_url`
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier as the backend knows it
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; backend default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Consume responses as streams
    #[serde(default)]
    pub stream: bool,

    /// Ask for reasoning output where the backend supports it
    #[serde(default)]
    pub enable_thinking: bool,

    /// Token budget for reasoning
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Sandbox settings for the file tool
    #[serde(default)]
    pub file_access: FileAccessConfig,

    /// Provider keys found in the environment; never written back to disk.
    #[serde(skip)]
    env_keys: HashMap<String, String>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_thinking_budget() -> u32 {
    2048
}
fn default_request_timeout() -> u64 {
    120
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("stream", &self.stream)
            .field("enable_thinking", &self.enable_thinking)
            .field("thinking_budget", &self.thinking_budget)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("providers", &self.providers)
            .field("file_access", &self.file_access)
            .field("env_keys", &self.env_keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Per-provider overrides.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Sandbox for the file-access tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAccessConfig {
    /// Base for relative paths; the process's current directory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Extra absolute roots; the working directory is always allowed
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,

    /// Glob or exact patterns matched against basename and full path
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,

    /// Cap on `find_files` results
    #[serde(default = "default_find_limit")]
    pub find_limit: usize,

    /// Run syntax checks after writes
    #[serde(default = "default_true")]
    pub auto_validate: bool,

    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
}

fn default_blacklist() -> Vec<String> {
    vec![
        ".env".into(),
        "*.env".into(),
        "*.pem".into(),
        "*.key".into(),
        "id_rsa*".into(),
        "id_ed25519*".into(),
        "*secret*".into(),
    ]
}
fn default_find_limit() -> usize {
    200
}
fn default_true() -> bool {
    true
}
fn default_validation_timeout() -> u64 {
    30
}

impl Default for FileAccessConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            allowed_roots: Vec::new(),
            blacklist: default_blacklist(),
            find_limit: default_find_limit(),
            auto_validate: default_true(),
            validation_timeout_secs: default_validation_timeout(),
        }
    }
}

impl FileAccessConfig {
    /// The configured working directory, or the process's current one.
    pub fn resolved_working_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().map_err(|e| {
                ConfigError::ValidationError(format!("cannot determine working directory: {e}"))
            }),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.convoke/config.toml).
    ///
    /// Environment overrides:
    /// - `CONVOKE_PROVIDER`, `CONVOKE_MODEL`
    /// - `CONVOKE_API_KEY` (when the file sets no top-level key)
    /// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `OPENROUTER_API_KEY`
    ///   (lowest priority, per provider)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_path(), |key| std::env::var(key).ok())
    }

    /// Load from `path`, applying overrides from `lookup`.
    pub fn load_with_env(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("CONVOKE_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) = lookup("CONVOKE_MODEL") {
            self.model = model;
        }
        if self.api_key.is_none() {
            self.api_key = lookup("CONVOKE_API_KEY");
        }
        for (provider, var) in PROVIDER_KEY_VARS {
            if let Some(key) = lookup(var) {
                self.env_keys.insert((*provider).to_string(), key);
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".convoke")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::ValidationError("provider must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }

        let fa = &self.file_access;
        if let Some(dir) = &fa.working_dir
            && !dir.is_absolute()
        {
            return Err(ConfigError::ValidationError(format!(
                "file_access.working_dir must be absolute, got '{}'",
                dir.display()
            )));
        }
        if let Some(root) = fa.allowed_roots.iter().find(|r| !r.is_absolute()) {
            return Err(ConfigError::ValidationError(format!(
                "file_access.allowed_roots entries must be absolute, got '{}'",
                root.display()
            )));
        }
        if fa.find_limit == 0 {
            return Err(ConfigError::ValidationError(
                "file_access.find_limit must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// API key for `provider`: its own section, then the top-level key,
    /// then the provider-specific environment variable.
    pub fn api_key_for(&self, provider: &str) -> Option<&str> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.as_deref())
            .or(self.api_key.as_deref())
            .or_else(|| self.env_keys.get(provider).map(String::as_str))
    }

    pub fn api_url_for(&self, provider: &str) -> Option<&str> {
        self.providers.get(provider).and_then(|p| p.api_url.as_deref())
    }

    /// Check if an API key is available for the selected provider.
    pub fn has_api_key(&self) -> bool {
        self.api_key_for(&self.provider).is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            stream: false,
            enable_thinking: false,
            thinking_budget: default_thinking_budget(),
            request_timeout_secs: default_request_timeout(),
            providers: HashMap::new(),
            file_access: FileAccessConfig::default(),
            env_keys: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
