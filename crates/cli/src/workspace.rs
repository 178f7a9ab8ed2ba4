//! Builds the sandboxed file tools and the composite registry from config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use convoke_config::FileAccessConfig;
use convoke_core::registry::{CompositeRegistry, Registry};
use convoke_security::{AccessPolicy, AuditLogger};
use convoke_tools::{FileAccess, Validator};
use tracing::debug;

/// The file-access tool configured by `[file_access]`.
pub fn file_access(config: &FileAccessConfig, audit: Arc<AuditLogger>) -> anyhow::Result<Arc<FileAccess>> {
    let working_dir = config.resolved_working_dir()?;
    let policy = AccessPolicy::new(&working_dir, config.allowed_roots.clone(), config.blacklist.clone())
        .with_context(|| format!("invalid sandbox rooted at {}", working_dir.display()))?;

    let mut access = FileAccess::new(policy)
        .with_audit(audit)
        .with_find_limit(config.find_limit);
    if config.auto_validate {
        access = access.with_validator(Validator::with_processes(Duration::from_secs(
            config.validation_timeout_secs,
        )));
    }

    debug!(
        working_dir = %working_dir.display(),
        roots = config.allowed_roots.len(),
        blacklist = config.blacklist.len(),
        auto_validate = config.auto_validate,
        "File access configured"
    );
    Ok(Arc::new(access))
}

/// Every tool the binary offers, flattened into one namespace.
pub fn registry(access: &Arc<FileAccess>) -> Arc<dyn Registry> {
    let sources: Vec<Arc<dyn Registry>> = vec![Arc::new(access.registry())];
    Arc::new(CompositeRegistry::new(sources))
}
