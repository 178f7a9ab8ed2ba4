//! `convoke config`: Configuration management commands.

use std::path::Path;

use anyhow::Context;
use convoke_config::AppConfig;

pub fn show(config_path: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    println!("{config:#?}");
    Ok(())
}

pub fn path(config_path: &Path) {
    println!("{}", config_path.display());
}

pub fn init(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(config_path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}

pub fn validate(config_path: &Path) -> anyhow::Result<()> {
    println!("Validating {}...", config_path.display());
    let config = super::load_config(config_path)?;
    println!("   Config parsed and validated");

    if !config.has_api_key() && config.provider != "ollama" {
        println!(
            "   Warning: no API key for '{}' (set api_key or the provider's environment variable)",
            config.provider
        );
    }

    println!();
    println!("   Provider:  {}", config.provider);
    println!("   Model:     {}", config.model);
    println!("   Streaming: {}", config.stream);
    println!(
        "   Sandbox:   {}",
        config
            .file_access
            .working_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "(current directory)".into())
    );
    Ok(())
}
