//! `convoke tools` and `convoke call`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use convoke_core::context::CallContext;
use convoke_security::AuditLogger;

pub fn list(config_path: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let access = convoke::file_access(&config.file_access, Arc::new(AuditLogger::tracing()))?;
    let registry = convoke::registry(&access);

    println!("Sandbox: {}", access.policy().working_dir().display());
    for root in access.policy().allowed_roots().iter().skip(1) {
        println!("  also:  {}", root.display());
    }
    println!();
    for tool in registry.list().values() {
        println!("{}", tool.name);
        println!("    {}", tool.description);
        for arg in &tool.arguments {
            let marker = if arg.required { "required" } else { "optional" };
            println!("    - {} ({}, {marker}): {}", arg.name, arg.kind.as_str(), arg.description);
        }
    }
    Ok(())
}

pub async fn call(config_path: &Path, name: &str, raw_args: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let access = convoke::file_access(&config.file_access, Arc::new(AuditLogger::tracing()))?;
    let registry = convoke::registry(&access);

    let args: serde_json::Value = serde_json::from_str(raw_args).context("--args must be valid JSON")?;
    let serde_json::Value::Object(args) = args else {
        bail!("--args must be a JSON object");
    };

    let result = registry.dispatch(&CallContext::new(), name, &args).await?;
    if !result.text.is_empty() {
        println!("{}", result.text);
    }
    if let Some(error) = result.error {
        bail!("{name} failed: {error}");
    }
    Ok(())
}
