// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;

use crate::engine::retry::RetryPolicy;
use crate::engine::session::SessionSettings;
use crate::model::DeploymentSpec;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [paths]
/// base = "/home/dev/project"
/// target_base = "/srv/server/deployments"
///
/// [watcher]
/// debounce_ms = 300
/// exclude = ["**/*.swp"]
///
/// [[deployment]]
/// source = "web/target/classes"
/// target = "app.war/WEB-INF/classes"
/// redeploy_on_change = true
/// ```
///
/// `[watcher]` and `[retry]` are optional and have working defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub paths: PathsSection,

    #[serde(default)]
    pub watcher: WatcherSection,

    #[serde(default)]
    pub retry: RetrySection,

    /// All `[[deployment]]` entries, in file order.
    #[serde(default)]
    pub deployment: Vec<DeploymentEntry>,
}

/// `[paths]` section: the two roots everything else resolves against.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    /// Root the relative deployment sources (and watch bases) resolve
    /// against.
    pub base: PathBuf,

    /// Root of the exploded deployment directory; relative targets and
    /// marker files live under it.
    pub target_base: PathBuf,
}

/// `[watcher]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSection {
    /// Quiet period before a burst of events is flushed, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Capacity of the bounded queue between the OS callback and the
    /// coalescer. Overflowing events are dropped with a warning.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long the OS callback waits before re-trying a full queue once,
    /// in milliseconds.
    #[serde(default = "default_offer_timeout_ms")]
    pub offer_timeout_ms: u64,

    /// Concurrent workers applying changes to the target.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Quiet period per archive before a redeploy marker is written, in
    /// milliseconds. Clamped at runtime to 500..=10000.
    #[serde(default = "default_redeploy_delay_ms")]
    pub redeploy_delay_ms: u64,

    /// Directory recursion limit for watch registration.
    #[serde(default = "default_max_watch_depth")]
    pub max_watch_depth: usize,

    /// Glob patterns (relative to `paths.base`) whose events are ignored.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_offer_timeout_ms() -> u64 {
    100
}

fn default_worker_threads() -> usize {
    2
}

fn default_redeploy_delay_ms() -> u64 {
    2000
}

fn default_max_watch_depth() -> usize {
    64
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            queue_capacity: default_queue_capacity(),
            offer_timeout_ms: default_offer_timeout_ms(),
            worker_threads: default_worker_threads(),
            redeploy_delay_ms: default_redeploy_delay_ms(),
            max_watch_depth: default_max_watch_depth(),
            exclude: Vec::new(),
        }
    }
}

impl WatcherSection {
    /// Compile the exclude patterns. `None` when there are none.
    pub fn build_excludes(&self) -> Result<Option<GlobSet>> {
        if self.exclude.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern {pattern:?}"))?;
            builder.add(glob);
        }
        Ok(Some(builder.build()?))
    }
}

/// `[retry]` section: lock-probe retry behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// One `[[deployment]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentEntry {
    /// Source directory; relative paths resolve against `paths.base`.
    pub source: PathBuf,

    /// Target location; relative paths resolve against `paths.target_base`
    /// (or `paths.base` with `use_source_filesystem_only`).
    pub target: PathBuf,

    /// Optional watch base above the source. The directories between base
    /// and source are watched so the source surviving a wipe-and-rebuild is
    /// picked up again.
    #[serde(default)]
    pub base: Option<PathBuf>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Whether archives arriving in the source should be unpacked into the
    /// target instead of copied as-is.
    #[serde(default)]
    pub unpack: bool,

    /// Request a consumer redeploy of the enclosing archive after changes.
    #[serde(default)]
    pub redeploy_on_change: bool,

    /// Target lives on the source filesystem (no separate deployment
    /// directory).
    #[serde(default)]
    pub use_source_filesystem_only: bool,
}

fn default_enabled() -> bool {
    true
}

impl ConfigFile {
    pub fn deployment_specs(&self) -> Vec<DeploymentSpec> {
        self.deployment
            .iter()
            .map(|entry| DeploymentSpec {
                source: entry.source.clone(),
                target: entry.target.clone(),
                base: entry.base.clone(),
                enabled: entry.enabled,
                unpack: entry.unpack,
                redeploy_on_change: entry.redeploy_on_change,
                use_source_filesystem_only: entry.use_source_filesystem_only,
            })
            .collect()
    }

    pub fn session_settings(&self) -> Result<SessionSettings> {
        Ok(SessionSettings {
            base_path: self.paths.base.clone(),
            target_base: self.paths.target_base.clone(),
            queue_capacity: self.watcher.queue_capacity,
            debounce_window: Duration::from_millis(self.watcher.debounce_ms),
            offer_timeout: Duration::from_millis(self.watcher.offer_timeout_ms),
            worker_threads: self.watcher.worker_threads,
            redeploy_delay: Duration::from_millis(self.watcher.redeploy_delay_ms),
            max_watch_depth: self.watcher.max_watch_depth,
            excludes: self.watcher.build_excludes()?,
            retry: self.retry.policy(),
        })
    }
}
