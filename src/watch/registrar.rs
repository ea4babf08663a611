// src/watch/registrar.rs

//! Watch registration for deployment source trees.
//!
//! The OS backend only watches single directories, so recursion is built
//! here: every directory of a source tree is registered individually, and
//! the registrar listens on the technical channel to pick up directories
//! created after startup. Newly discovered directories are registered
//! before their contents are scanned, and files already inside them are
//! offered as synthetic Create events so nothing slips through the gap
//! between `mkdir` and watch registration.
//!
//! A deployment with an explicit watch base also registers the chain of
//! pass-through directories between the base and the source (see
//! [`crate::model::intermediate_chain`]); events inside those directories
//! are only let through by the [`WatchFilter`] when they fall under a
//! registered source.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::errors::Result;
use crate::fs::{DeployFs, VisitOutcome, walk_tree};
use crate::model::intermediate_chain;
use crate::watch::bus::FileEventObserver;
use crate::watch::event::{EventKind, PathEvent};
use crate::watch::watcher::{EventWatcher, WatchFilter};

/// One registered source tree, with the subtrees that belong to nested
/// deployments carved out.
#[derive(Debug, Clone)]
struct RootRegistration {
    base: PathBuf,
    source: PathBuf,
    excluded: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct RegistrarState {
    roots: Vec<RootRegistration>,
    /// Directories with an active watch. Pruned on deletion so a
    /// recreated directory is registered again.
    registered: HashSet<PathBuf>,
    /// Every directory ever seen under a source, kept across deletion so
    /// the engine can still classify a Delete event whose subject is gone.
    known_dirs: HashSet<PathBuf>,
}

pub struct WatchRegistrar {
    watcher: Arc<dyn EventWatcher>,
    fs: Arc<dyn DeployFs>,
    filter: Arc<WatchFilter>,
    max_depth: usize,
    state: Mutex<RegistrarState>,
}

impl std::fmt::Debug for WatchRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistrar")
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl WatchRegistrar {
    pub fn new(
        watcher: Arc<dyn EventWatcher>,
        fs: Arc<dyn DeployFs>,
        filter: Arc<WatchFilter>,
        max_depth: usize,
    ) -> Self {
        Self {
            watcher,
            fs,
            filter,
            max_depth,
            state: Mutex::new(RegistrarState::default()),
        }
    }

    /// Register a deployment's source tree.
    ///
    /// With a watch base, the pass-through directories from the base up to
    /// (but excluding) the source are registered non-recursively first, so
    /// that the source being wiped and recreated (a build `clean`) is
    /// observed. The source itself is then registered recursively, skipping
    /// the `excluded` subtrees, which belong to nested deployments.
    ///
    /// A failure to register the source root itself is fatal; failures on
    /// subdirectories are logged and skipped.
    pub fn register_roots(
        &self,
        source: &Path,
        base: Option<&Path>,
        excluded: Vec<PathBuf>,
    ) -> Result<()> {
        let base = base.unwrap_or(source).to_path_buf();
        for passthrough in intermediate_chain(&base, source)? {
            self.register_single(&passthrough)?;
        }

        self.filter.add_include_root(source.to_path_buf());
        self.register_single(source)?;
        self.register_subtree(source, &excluded, false)?;

        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("registrar state poisoned"))?
            .roots
            .push(RootRegistration {
                base,
                source: source.to_path_buf(),
                excluded,
            });
        Ok(())
    }

    /// True when `path` was a directory the last time it existed. Consumes
    /// the entry.
    pub fn take_known_dir(&self, path: &Path) -> bool {
        match self.state.lock() {
            Ok(mut state) => state.known_dirs.remove(path),
            Err(_) => false,
        }
    }

    fn register_single(&self, path: &Path) -> Result<()> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("registrar state poisoned"))?;
            if !state.registered.insert(path.to_path_buf()) {
                return Ok(());
            }
            state.known_dirs.insert(path.to_path_buf());
        }
        debug!(?path, "registering directory watch");
        if let Err(err) = self.watcher.register(path) {
            if let Ok(mut state) = self.state.lock() {
                state.registered.remove(path);
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Register every directory below `root`, pruning `excluded` subtrees.
    /// With `offer_contents`, files found along the way are offered as
    /// synthetic Create events.
    fn register_subtree(
        &self,
        root: &Path,
        excluded: &[PathBuf],
        offer_contents: bool,
    ) -> Result<()> {
        walk_tree(
            self.fs.as_ref(),
            root,
            self.max_depth,
            &mut |dir| {
                if excluded.iter().any(|e| dir == e) {
                    debug!(?dir, "skipping nested deployment subtree");
                    return VisitOutcome::SkipSubtree;
                }
                match self.register_single(dir) {
                    Ok(()) => VisitOutcome::Descend,
                    Err(err) => {
                        warn!(?dir, error = %err, "failed to watch directory, skipping subtree");
                        VisitOutcome::SkipSubtree
                    }
                }
            },
            &mut |file| {
                if offer_contents {
                    self.watcher
                        .offer(PathEvent::new(file.to_path_buf(), EventKind::Create));
                }
            },
            &mut |path, err| {
                warn!(?path, error = %err, "failed to list directory during registration");
            },
        )?;
        Ok(())
    }

    /// Locate the registration responsible for a path: the one with the
    /// longest source that encloses it (nested deployments win over their
    /// parents), or a pass-through match on the base.
    fn registration_for(&self, path: &Path) -> Option<RootRegistration> {
        let state = self.state.lock().ok()?;
        state
            .roots
            .iter()
            .filter(|r| path.starts_with(&r.source))
            .max_by_key(|r| r.source.components().count())
            .or_else(|| {
                state
                    .roots
                    .iter()
                    .find(|r| path.starts_with(&r.base) && r.source.starts_with(path))
            })
            .cloned()
    }

    fn handle_new_directory(&self, path: &Path) {
        let Some(registration) = self.registration_for(path) else {
            return;
        };
        if registration
            .excluded
            .iter()
            .any(|e| path.starts_with(e))
        {
            // Belongs to a nested deployment; its own registration covers it.
            return;
        }

        if path.starts_with(&registration.source) {
            if let Err(err) = self.register_subtree(path, &registration.excluded, true) {
                warn!(?path, error = %err, "failed to register new directory");
            }
            return;
        }

        // A pass-through directory reappeared (e.g. `target/` after a clean
        // build). Re-register the chain below it as far as it exists, and
        // the source tree itself if it is already back.
        if let Err(err) = self.reregister_passthrough(path, &registration) {
            warn!(?path, error = %err, "failed to re-register pass-through chain");
        }
    }

    fn reregister_passthrough(&self, path: &Path, registration: &RootRegistration) -> Result<()> {
        for dir in intermediate_chain(path, &registration.source)? {
            if !self.fs.is_dir(&dir) {
                return Ok(());
            }
            self.register_single(&dir)?;
        }
        if self.fs.is_dir(&registration.source) {
            self.register_single(&registration.source)?;
            self.register_subtree(&registration.source, &registration.excluded, true)?;
        }
        Ok(())
    }
}

/// The registrar rides the technical channel: it must see creations before
/// the coalescer debounce so new directories are watched in time.
impl FileEventObserver for WatchRegistrar {
    fn on_create(&self, path: &Path) {
        if self.fs.is_dir(path) {
            self.handle_new_directory(path);
        } else if let Ok(mut state) = self.state.lock() {
            // A file now occupies this name; forget any directory history.
            state.known_dirs.remove(path);
        }
    }

    fn on_delete(&self, path: &Path) {
        if let Ok(mut state) = self.state.lock() {
            state.registered.retain(|p| !p.starts_with(path));
            // Keep `path` itself in known_dirs for the engine's Delete
            // classification; only descendants are dropped.
            state
                .known_dirs
                .retain(|p| !p.starts_with(path) || p.as_path() == path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use anyhow::Result as AnyResult;

    #[derive(Default)]
    struct FakeWatcher {
        registered: Mutex<Vec<PathBuf>>,
        offered: Mutex<Vec<PathEvent>>,
    }

    impl EventWatcher for FakeWatcher {
        fn register(&self, path: &Path) -> AnyResult<()> {
            self.registered.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        fn offer(&self, event: PathEvent) {
            self.offered.lock().unwrap().push(event);
        }
    }

    fn registrar(fs: &MockFileSystem) -> (Arc<FakeWatcher>, WatchRegistrar) {
        let watcher = Arc::new(FakeWatcher::default());
        let filter = Arc::new(WatchFilter::new(PathBuf::from("/p"), None));
        let registrar = WatchRegistrar::new(
            watcher.clone(),
            Arc::new(fs.clone()),
            filter,
            usize::MAX,
        );
        (watcher, registrar)
    }

    #[test]
    fn base_chain_is_registered_without_recursion() {
        let fs = MockFileSystem::new();
        fs.add_dir("/p/m/target/classes/com");
        fs.add_dir("/p/m/src"); // sibling of the chain, must not be watched
        let (watcher, registrar) = registrar(&fs);

        registrar
            .register_roots(
                Path::new("/p/m/target/classes"),
                Some(Path::new("/p")),
                Vec::new(),
            )
            .unwrap();

        let registered = watcher.registered.lock().unwrap().clone();
        assert_eq!(
            registered,
            vec![
                PathBuf::from("/p"),
                PathBuf::from("/p/m"),
                PathBuf::from("/p/m/target"),
                PathBuf::from("/p/m/target/classes"),
                PathBuf::from("/p/m/target/classes/com"),
            ]
        );
    }

    #[test]
    fn nested_deployment_subtrees_are_excluded() {
        let fs = MockFileSystem::new();
        fs.add_dir("/p/a/sub");
        fs.add_dir("/p/a/nested/deep");
        let (watcher, registrar) = registrar(&fs);

        registrar
            .register_roots(
                Path::new("/p/a"),
                None,
                vec![PathBuf::from("/p/a/nested")],
            )
            .unwrap();

        let registered = watcher.registered.lock().unwrap().clone();
        assert!(registered.contains(&PathBuf::from("/p/a/sub")));
        assert!(!registered.contains(&PathBuf::from("/p/a/nested")));
        assert!(!registered.contains(&PathBuf::from("/p/a/nested/deep")));
    }

    #[test]
    fn new_directory_is_registered_with_synthetic_creates() {
        let fs = MockFileSystem::new();
        fs.add_dir("/p/a");
        let (watcher, registrar) = registrar(&fs);
        registrar
            .register_roots(Path::new("/p/a"), None, Vec::new())
            .unwrap();

        // Directory plus file appear before the create event is handled.
        fs.add_file("/p/a/new/file.txt", "x");
        registrar.on_create(Path::new("/p/a/new"));

        let registered = watcher.registered.lock().unwrap().clone();
        assert!(registered.contains(&PathBuf::from("/p/a/new")));
        let offered = watcher.offered.lock().unwrap().clone();
        assert_eq!(
            offered,
            vec![PathEvent::new("/p/a/new/file.txt", EventKind::Create)]
        );
    }

    #[test]
    fn recreated_passthrough_restores_the_source_watch() {
        let fs = MockFileSystem::new();
        fs.add_dir("/p/m/target/classes");
        let (watcher, registrar) = registrar(&fs);
        registrar
            .register_roots(
                Path::new("/p/m/target/classes"),
                Some(Path::new("/p")),
                Vec::new(),
            )
            .unwrap();

        // Simulate `clean` + rebuild: target goes away and comes back with
        // content already inside.
        registrar.on_delete(Path::new("/p/m/target"));
        fs.remove("/p/m/target");
        fs.add_file("/p/m/target/classes/A.class", "x");
        registrar.on_create(Path::new("/p/m/target"));

        let registered = watcher.registered.lock().unwrap().clone();
        let reregistrations = registered
            .iter()
            .filter(|p| **p == PathBuf::from("/p/m/target/classes"))
            .count();
        assert_eq!(reregistrations, 2);
        let offered = watcher.offered.lock().unwrap().clone();
        assert_eq!(
            offered,
            vec![PathEvent::new(
                "/p/m/target/classes/A.class",
                EventKind::Create
            )]
        );
    }

    #[test]
    fn deleted_directory_stays_known_until_consumed() {
        let fs = MockFileSystem::new();
        fs.add_dir("/p/a/dir");
        let (_watcher, registrar) = registrar(&fs);
        registrar
            .register_roots(Path::new("/p/a"), None, Vec::new())
            .unwrap();

        registrar.on_delete(Path::new("/p/a/dir"));
        assert!(registrar.take_known_dir(Path::new("/p/a/dir")));
        assert!(!registrar.take_known_dir(Path::new("/p/a/dir")));
    }

    #[test]
    fn new_directory_inside_excluded_subtree_is_ignored() {
        let fs = MockFileSystem::new();
        fs.add_dir("/p/a");
        fs.add_dir("/p/a/nested");
        let (watcher, registrar) = registrar(&fs);
        registrar
            .register_roots(
                Path::new("/p/a"),
                None,
                vec![PathBuf::from("/p/a/nested")],
            )
            .unwrap();

        fs.add_dir("/p/a/nested/fresh");
        registrar.on_create(Path::new("/p/a/nested/fresh"));
        let registered = watcher.registered.lock().unwrap().clone();
        assert!(!registered.contains(&PathBuf::from("/p/a/nested/fresh")));
    }
}
