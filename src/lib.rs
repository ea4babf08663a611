// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod model;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::fs::{DeployFs, RealFileSystem};
use crate::model::{Deployment, build_forest};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the deployment forest
/// - the watch session (backend, coalescer, workers)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let forest = build_forest(
        cfg.deployment_specs(),
        &cfg.paths.base,
        &cfg.paths.target_base,
    )?;

    if args.dry_run {
        print_dry_run(&cfg, &forest);
        return Ok(());
    }

    let settings = cfg.session_settings()?;
    let filesystem: Arc<dyn DeployFs> = Arc::new(RealFileSystem);
    let session = engine::session::start(
        settings,
        &forest,
        Arc::clone(&filesystem),
        filesystem,
    )?;

    info!("watching for changes; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    session.stop().await;
    Ok(())
}

/// Simple dry-run output: print the resolved deployment forest.
fn print_dry_run(cfg: &ConfigFile, forest: &[Deployment]) {
    println!("hotsync dry-run");
    println!("  paths.base = {}", cfg.paths.base.display());
    println!("  paths.target_base = {}", cfg.paths.target_base.display());
    println!("  watcher.debounce_ms = {}", cfg.watcher.debounce_ms);
    println!("  watcher.worker_threads = {}", cfg.watcher.worker_threads);
    println!();

    println!("deployments:");
    for deployment in forest {
        print_deployment(deployment, 1);
    }
}

fn print_deployment(deployment: &Deployment, indent: usize) {
    let pad = "  ".repeat(indent);
    println!("{pad}- {}", deployment.source.display());
    println!("{pad}    target: {}", deployment.target.display());
    if let Some(base) = &deployment.base {
        println!("{pad}    watch base: {}", base.display());
    }
    if !deployment.enabled {
        println!("{pad}    enabled: false");
    }
    if deployment.redeploy_on_change {
        println!("{pad}    redeploy_on_change: true");
    }
    if deployment.unpack {
        println!("{pad}    unpack: true");
    }
    if deployment.use_source_filesystem_only {
        println!("{pad}    use_source_filesystem_only: true");
    }
    for children in deployment.children.values() {
        for child in children {
            print_deployment(child, indent + 1);
        }
    }
}
