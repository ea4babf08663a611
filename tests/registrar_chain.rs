//! Watch registration against a real on-disk tree.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hotsync::fs::RealFileSystem;
use hotsync::watch::registrar::WatchRegistrar;
use hotsync::watch::watcher::{EventWatcher, WatchFilter};
use hotsync::watch::{EventKind, PathEvent};
use hotsync_test_utils::builders::{populate_tree, temp_root};

#[derive(Default)]
struct RecordingWatcher {
    registered: Mutex<Vec<PathBuf>>,
    offered: Mutex<Vec<PathEvent>>,
}

impl EventWatcher for RecordingWatcher {
    fn register(&self, path: &Path) -> anyhow::Result<()> {
        self.registered.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn offer(&self, event: PathEvent) {
        self.offered.lock().unwrap().push(event);
    }
}

#[test]
fn base_to_source_chain_is_watched_and_siblings_are_filtered() {
    hotsync_test_utils::init_tracing();
    let root = temp_root();
    populate_tree(
        root.path(),
        &[
            ("m/target/classes/com/App.class", "bytecode"),
            ("m/src/Main.java", "source"),
            ("other/readme.txt", "sibling of m"),
        ],
    );
    let base = root.path().to_path_buf();
    let source = base.join("m/target/classes");

    let watcher = Arc::new(RecordingWatcher::default());
    let filter = Arc::new(WatchFilter::new(base.clone(), None));
    let registrar = WatchRegistrar::new(
        watcher.clone(),
        Arc::new(RealFileSystem),
        Arc::clone(&filter),
        usize::MAX,
    );
    registrar
        .register_roots(&source, Some(&base), Vec::new())
        .unwrap();

    let registered = watcher.registered.lock().unwrap().clone();
    // Pass-through chain: base, m, m/target. Then the source subtree.
    assert_eq!(registered[0], base);
    assert_eq!(registered[1], base.join("m"));
    assert_eq!(registered[2], base.join("m/target"));
    assert_eq!(registered[3], source);
    assert!(registered.contains(&source.join("com")));
    // Chain siblings are never registered.
    assert!(!registered.contains(&base.join("m/src")));
    assert!(!registered.contains(&base.join("other")));

    // Events inside chain siblings are filtered out; events under the
    // source pass.
    assert!(filter.accepts(&source.join("com/App.class")));
    assert!(!filter.accepts(&base.join("m/src/Main.java")));
    assert!(!filter.accepts(&base.join("other/readme.txt")));
}

#[test]
fn directory_created_after_startup_is_backfilled() {
    hotsync_test_utils::init_tracing();
    let root = temp_root();
    populate_tree(root.path(), &[("app/existing.txt", "old")]);
    let source = root.path().join("app");

    let watcher = Arc::new(RecordingWatcher::default());
    let filter = Arc::new(WatchFilter::new(root.path().to_path_buf(), None));
    let registrar = WatchRegistrar::new(
        watcher.clone(),
        Arc::new(RealFileSystem),
        filter,
        usize::MAX,
    );
    registrar.register_roots(&source, None, Vec::new()).unwrap();

    // A directory with content appears; the technical observer hears about
    // the directory only.
    populate_tree(root.path(), &[("app/fresh/inner/file.txt", "new")]);
    hotsync::watch::FileEventObserver::on_create(&registrar, &source.join("fresh"));

    let registered = watcher.registered.lock().unwrap().clone();
    assert!(registered.contains(&source.join("fresh")));
    assert!(registered.contains(&source.join("fresh/inner")));

    let offered = watcher.offered.lock().unwrap().clone();
    assert!(offered.contains(&PathEvent::new(
        source.join("fresh/inner/file.txt"),
        EventKind::Create
    )));
}
