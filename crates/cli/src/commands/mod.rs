pub mod chat;
pub mod config_cmd;
pub mod tools;

use std::path::Path;

use anyhow::Context;
use convoke_config::AppConfig;

/// Load `path` with environment overrides applied.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::load_with_env(path, |key| std::env::var(key).ok())
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
