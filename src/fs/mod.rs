// src/fs/mod.rs

//! Filesystem abstraction.
//!
//! The sync engine never touches `std::fs` directly; everything goes
//! through [`DeployFs`] so the target side could later point at something
//! other than the local disk, and so tests can run against
//! [`mock::MockFileSystem`].

use std::fmt::Debug;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

pub mod markers;
pub mod mock;

/// Abstract filesystem interface for both the source and target side of a
/// deployment.
pub trait DeployFs: Send + Sync + Debug {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;
    /// Create all missing directories up to and including `path`.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    /// Remove a file or a whole directory tree. Missing paths are fine.
    fn delete_if_exists(&self, path: &Path) -> Result<()>;
    /// Create an empty file if it does not exist, leave it alone otherwise.
    fn touch(&self, path: &Path) -> Result<()>;
    /// Return full paths of the entries in a directory.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    /// Probe the target file with an exclusive lock and return a writer
    /// that holds the lock for its lifetime. The file is truncated once
    /// the lock is acquired.
    ///
    /// A consumer process holding the file open surfaces here as
    /// `ErrorKind::WouldBlock`, which callers treat as retryable.
    fn try_lock_exclusive(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;
}

/// Implementation that uses `std::fs`, with `fs2` for the lock probe.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl DeployFs for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file =
            fs::File::open(path).with_context(|| format!("opening file {:?}", path))?;
        Ok(Box::new(file))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("creating dir {:?}", path))
    }

    fn delete_if_exists(&self, path: &Path) -> Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)
                .with_context(|| format!("removing dir tree {:?}", path))?;
        } else if path.exists() {
            fs::remove_file(path).with_context(|| format!("removing file {:?}", path))?;
        }
        Ok(())
    }

    fn touch(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            OpenOptions::new()
                .create(true)
                .write(true)
                .open(path)
                .with_context(|| format!("touching file {:?}", path))?;
        }
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        Ok(entries)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).with_context(|| format!("canonicalizing {:?}", path))
    }

    fn try_lock_exclusive(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new().write(true).create(true).open(path)?;
        FileExt::try_lock_exclusive(&file)?;
        // Truncate only once we own the lock; the consumer may still be
        // reading the previous content up to that point.
        file.set_len(0)?;
        Ok(Box::new(file))
    }
}

/// What to do with a directory encountered during a tree walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    Descend,
    SkipSubtree,
}

/// Recursive directory walk over a [`DeployFs`], depth-limited.
///
/// `on_dir` runs for `root` and every subdirectory; returning
/// [`VisitOutcome::SkipSubtree`] prunes the subtree without descending.
/// `on_file` runs for every regular file inside visited directories.
/// `read_dir` failures below the root are reported through `on_error` and
/// the walk continues with the remaining siblings; only a failure to list
/// the root itself aborts.
pub fn walk_tree(
    fs: &dyn DeployFs,
    root: &Path,
    max_depth: usize,
    on_dir: &mut dyn FnMut(&Path) -> VisitOutcome,
    on_file: &mut dyn FnMut(&Path),
    on_error: &mut dyn FnMut(&Path, &anyhow::Error),
) -> Result<()> {
    if on_dir(root) == VisitOutcome::SkipSubtree || max_depth == 0 {
        return Ok(());
    }
    let entries = fs.read_dir(root)?;
    walk_entries(fs, entries, max_depth, on_dir, on_file, on_error);
    Ok(())
}

fn walk_entries(
    fs: &dyn DeployFs,
    entries: Vec<PathBuf>,
    depth_left: usize,
    on_dir: &mut dyn FnMut(&Path) -> VisitOutcome,
    on_file: &mut dyn FnMut(&Path),
    on_error: &mut dyn FnMut(&Path, &anyhow::Error),
) {
    for entry in entries {
        if fs.is_dir(&entry) {
            if on_dir(&entry) == VisitOutcome::SkipSubtree || depth_left <= 1 {
                continue;
            }
            match fs.read_dir(&entry) {
                Ok(children) => {
                    walk_entries(fs, children, depth_left - 1, on_dir, on_file, on_error)
                }
                Err(err) => on_error(&entry, &err),
            }
        } else {
            on_file(&entry);
        }
    }
}
