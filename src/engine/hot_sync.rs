// src/engine/hot_sync.rs

//! The sync engine: coalesced source events in, target mutations out.
//!
//! Event paths are resolved against a route table built from the
//! deployment forest. The route with the longest source prefix wins, so an
//! event inside a nested deployment reaches the nested mapping even when
//! its target lies outside the parent's target.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::engine::lock_ops::{CopyOutcome, LockedFileOps, TargetSide};
use crate::engine::redeploy::RedeployDebouncer;
use crate::errors::HotSyncError;
use crate::model::Deployment;
use crate::watch::bus::FileEventObserver;
use crate::watch::registrar::WatchRegistrar;

/// One resolvable source-to-target mapping.
#[derive(Debug, Clone)]
struct DeploymentRoute {
    source: PathBuf,
    target: PathBuf,
    redeploy_on_change: bool,
    /// Archive to mark for redeploy after a change, when determinable.
    archive: Option<PathBuf>,
    side: TargetSide,
}

pub struct HotSyncEngine {
    ops: LockedFileOps,
    registrar: Arc<WatchRegistrar>,
    debouncer: Arc<RedeployDebouncer>,
    target_base: PathBuf,
    routes: RwLock<Vec<DeploymentRoute>>,
}

impl std::fmt::Debug for HotSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotSyncEngine")
            .field("target_base", &self.target_base)
            .finish_non_exhaustive()
    }
}

impl HotSyncEngine {
    pub fn new(
        ops: LockedFileOps,
        registrar: Arc<WatchRegistrar>,
        debouncer: Arc<RedeployDebouncer>,
        target_base: PathBuf,
    ) -> Self {
        Self {
            ops,
            registrar,
            debouncer,
            target_base,
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Register watches for every enabled deployment in the forest and
    /// build the route table.
    ///
    /// Subtrees of direct children are excluded from the parent's watch
    /// registration, so their events resolve to the child's own watch.
    pub fn register_all(&self, forest: &[Deployment]) -> crate::errors::Result<()> {
        let mut routes: Vec<DeploymentRoute> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for deployment in forest.iter().flat_map(Deployment::flatten) {
            if !deployment.enabled {
                info!(source = ?deployment.source, "deployment disabled, not watching");
                continue;
            }
            if !seen.insert(deployment.source.clone()) {
                return Err(HotSyncError::DuplicateWatchPath(deployment.source.clone()));
            }

            self.registrar.register_roots(
                &deployment.source,
                deployment.base.as_deref(),
                deployment.direct_child_sources(),
            )?;
            info!(
                source = ?deployment.source,
                target = ?deployment.target,
                "watching deployment"
            );

            routes.push(DeploymentRoute {
                source: deployment.source.clone(),
                target: deployment.target.clone(),
                redeploy_on_change: deployment.redeploy_on_change,
                archive: deployment.enclosing_target_archive(&self.target_base),
                side: if deployment.use_source_filesystem_only {
                    TargetSide::Source
                } else {
                    TargetSide::Deployment
                },
            });
        }

        match self.routes.write() {
            Ok(mut table) => *table = routes,
            Err(_) => {
                return Err(HotSyncError::WatchSetup("route table poisoned".to_string()));
            }
        }
        Ok(())
    }

    /// Longest-source-prefix match over the route table.
    fn resolve(&self, path: &Path) -> Option<DeploymentRoute> {
        let routes = self.routes.read().ok()?;
        routes
            .iter()
            .filter(|route| path.starts_with(&route.source))
            .max_by_key(|route| route.source.components().count())
            .cloned()
    }

    fn target_path(route: &DeploymentRoute, source_path: &Path) -> Option<PathBuf> {
        let relative = source_path.strip_prefix(&route.source).ok()?;
        Some(route.target.join(relative))
    }

    fn arm_redeploy(&self, route: &DeploymentRoute) {
        if !route.redeploy_on_change {
            return;
        }
        match &route.archive {
            Some(archive) => self.debouncer.trigger(archive.clone()),
            None => warn!(
                target = ?route.target,
                "cannot determine enclosing archive, skipping redeploy request"
            ),
        }
    }

    fn sync_path(&self, path: &Path) -> Result<()> {
        let Some(route) = self.resolve(path) else {
            debug!(?path, "no deployment resolves this path");
            return Ok(());
        };
        let Some(target) = Self::target_path(&route, path) else {
            return Ok(());
        };

        match self.ops.copy(path, &target, route.side)? {
            CopyOutcome::SourceVanished => {}
            CopyOutcome::CreatedDir => {
                debug!(?target, "created target directory");
                self.arm_redeploy(&route);
            }
            CopyOutcome::Copied { bytes } => {
                info!(source = ?path, ?target, bytes, "synced file");
                self.arm_redeploy(&route);
            }
        }
        Ok(())
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        let Some(route) = self.resolve(path) else {
            debug!(?path, "no deployment resolves this path");
            return Ok(());
        };
        let Some(target) = Self::target_path(&route, path) else {
            return Ok(());
        };

        // The subject is usually gone by now; the registrar's shadow set
        // remembers whether it was a directory.
        let was_dir = self.registrar.take_known_dir(path) || self.ops.source_is_dir(path);
        self.ops.delete(&target, route.side, was_dir)?;
        info!(
            source = ?path,
            ?target,
            directory = was_dir,
            "removed target path"
        );
        self.arm_redeploy(&route);
        Ok(())
    }
}

/// Functional observer: runs on the worker pool with coalesced events. A
/// failed path is logged and the rest of the batch continues.
impl FileEventObserver for HotSyncEngine {
    fn on_create(&self, path: &Path) {
        if let Err(err) = self.sync_path(path) {
            error!(?path, error = %err, "failed to sync created path");
        }
    }

    fn on_modify(&self, path: &Path) {
        if let Err(err) = self.sync_path(path) {
            error!(?path, error = %err, "failed to sync modified path");
        }
    }

    fn on_delete(&self, path: &Path) {
        if let Err(err) = self.remove_path(path) {
            error!(?path, error = %err, "failed to remove target path");
        }
    }

    fn on_overflow(&self) {
        warn!("event overflow reported; target may be out of sync until the next change");
    }
}
