// src/config/validate.rs

use anyhow::{Context, Result, anyhow};

use crate::config::model::ConfigFile;

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - there is at least one deployment
/// - queue capacity, worker count, debounce and retry numbers are sane
/// - exclude patterns compile
/// - deployment sources and targets are non-empty
///
/// Path relationships (base is a prefix of source, duplicate sources) are
/// validated later when the deployment forest is assembled, after relative
/// paths have been resolved.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    ensure_has_deployments(cfg)?;
    validate_watcher(cfg)?;
    validate_retry(cfg)?;
    validate_deployments(cfg)?;
    Ok(())
}

fn ensure_has_deployments(cfg: &ConfigFile) -> Result<()> {
    if cfg.deployment.is_empty() {
        return Err(anyhow!(
            "config must contain at least one [[deployment]] section"
        ));
    }
    Ok(())
}

fn validate_watcher(cfg: &ConfigFile) -> Result<()> {
    let watcher = &cfg.watcher;
    if watcher.queue_capacity == 0 {
        return Err(anyhow!("[watcher].queue_capacity must be >= 1 (got 0)"));
    }
    if watcher.worker_threads == 0 {
        return Err(anyhow!("[watcher].worker_threads must be >= 1 (got 0)"));
    }
    if watcher.debounce_ms == 0 {
        return Err(anyhow!("[watcher].debounce_ms must be >= 1 (got 0)"));
    }
    if watcher.max_watch_depth == 0 {
        return Err(anyhow!("[watcher].max_watch_depth must be >= 1 (got 0)"));
    }
    watcher
        .build_excludes()
        .context("invalid [watcher].exclude")?;
    Ok(())
}

fn validate_retry(cfg: &ConfigFile) -> Result<()> {
    if cfg.retry.max_attempts == 0 {
        return Err(anyhow!("[retry].max_attempts must be >= 1 (got 0)"));
    }
    if cfg.retry.backoff_multiplier < 1.0 {
        return Err(anyhow!(
            "[retry].backoff_multiplier must be >= 1.0 (got {})",
            cfg.retry.backoff_multiplier
        ));
    }
    Ok(())
}

fn validate_deployments(cfg: &ConfigFile) -> Result<()> {
    for (index, deployment) in cfg.deployment.iter().enumerate() {
        if deployment.source.as_os_str().is_empty() {
            return Err(anyhow!("deployment #{} has an empty source", index + 1));
        }
        if deployment.target.as_os_str().is_empty() {
            return Err(anyhow!(
                "deployment #{} ({:?}) has an empty target",
                index + 1,
                deployment.source
            ));
        }
    }
    Ok(())
}
