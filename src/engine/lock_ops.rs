// src/engine/lock_ops.rs

//! Lock-aware file propagation.
//!
//! The consumer process (application server) may hold a deployed file open
//! while reloading it. A copy therefore probes the target with an exclusive
//! lock first and retries with backoff while the probe reports
//! `WouldBlock`. Directories and vanished sources bypass the lock protocol
//! entirely.

use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::engine::retry::{Attempt, RetryPolicy};
use crate::fs::DeployFs;

/// What a propagation call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// File content written under an exclusive lock.
    Copied { bytes: u64 },
    /// Source was a directory; the target directory was created.
    CreatedDir,
    /// Source disappeared between the event and the copy; nothing done.
    SourceVanished,
}

/// Which filesystem handle the target side of an operation goes through.
/// Deployments with `use_source_filesystem_only` write back into the source
/// filesystem instead of the deployment one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSide {
    Deployment,
    Source,
}

/// File operations between the source tree and the deployment target.
#[derive(Debug, Clone)]
pub struct LockedFileOps {
    source_fs: Arc<dyn DeployFs>,
    target_fs: Arc<dyn DeployFs>,
    policy: RetryPolicy,
}

impl LockedFileOps {
    pub fn new(
        source_fs: Arc<dyn DeployFs>,
        target_fs: Arc<dyn DeployFs>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            source_fs,
            target_fs,
            policy,
        }
    }

    fn fs_for(&self, side: TargetSide) -> &dyn DeployFs {
        match side {
            TargetSide::Deployment => self.target_fs.as_ref(),
            TargetSide::Source => self.source_fs.as_ref(),
        }
    }

    /// Propagate `source` to `target`.
    ///
    /// Re-checks the source at call time: events are stale by the debounce
    /// window, so the file may be gone or may have turned into a directory.
    /// Regular files are written under an exclusive lock on the target,
    /// retried per the policy while the lock is held elsewhere.
    pub fn copy(&self, source: &Path, target: &Path, side: TargetSide) -> Result<CopyOutcome> {
        let target_fs = self.fs_for(side);
        if !self.source_fs.exists(source) {
            debug!(?source, "source vanished before copy");
            return Ok(CopyOutcome::SourceVanished);
        }
        if self.source_fs.is_dir(source) {
            target_fs.create_dir_all(target)?;
            return Ok(CopyOutcome::CreatedDir);
        }

        if let Some(parent) = target.parent() {
            target_fs.create_dir_all(parent)?;
        }

        self.policy.run(|| {
            if !self.source_fs.exists(source) {
                debug!(?source, "source vanished during retry");
                return Ok(Attempt::Done(CopyOutcome::SourceVanished));
            }
            let mut writer = match target_fs.try_lock_exclusive(target) {
                Ok(writer) => writer,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Ok(Attempt::Retry(format!(
                        "target {} is locked by another process",
                        target.display()
                    )));
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("locking target {}", target.display()));
                }
            };

            let mut reader = self.source_fs.open_read(source)?;
            let bytes = io::copy(&mut reader, &mut writer)
                .with_context(|| format!("copying {} to {}", source.display(), target.display()))?;
            writer.flush()?;
            // Dropping the writer releases the lock.
            Ok(Attempt::Done(CopyOutcome::Copied { bytes }))
        })
    }

    /// True when `source` currently is a directory.
    pub fn source_is_dir(&self, source: &Path) -> bool {
        self.source_fs.is_dir(source)
    }

    /// Remove `target`. `directory` is the caller's classification of the
    /// deleted source path: a directory delete removes the whole mapped
    /// tree, a file delete removes a single file and leaves a directory
    /// target untouched (the classification was stale). No lock protocol:
    /// deletion of an open file is the consumer's problem to survive, as it
    /// is with a full undeploy.
    pub fn delete(&self, target: &Path, side: TargetSide, directory: bool) -> Result<()> {
        let target_fs = self.fs_for(side);
        if !directory && target_fs.is_dir(target) {
            debug!(?target, "file delete maps onto a directory target, leaving it in place");
            return Ok(());
        }
        target_fs.delete_if_exists(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use std::path::PathBuf;
    use std::time::Duration;

    fn ops(source: &MockFileSystem, target: &MockFileSystem, attempts: u32) -> LockedFileOps {
        LockedFileOps::new(
            Arc::new(source.clone()),
            Arc::new(target.clone()),
            RetryPolicy {
                max_attempts: attempts,
                initial_delay: Duration::from_millis(1),
                backoff_multiplier: 2.0,
            },
        )
    }

    #[test]
    fn copies_file_content_and_creates_parents() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        source.add_file("/src/a/b.txt", "hello");

        let outcome = ops(&source, &target, 3)
            .copy(Path::new("/src/a/b.txt"), Path::new("/out/deep/b.txt"), TargetSide::Deployment)
            .unwrap();
        assert_eq!(outcome, CopyOutcome::Copied { bytes: 5 });
        assert_eq!(
            target.file_content(PathBuf::from("/out/deep/b.txt")),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn vanished_source_is_not_an_error() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        let outcome = ops(&source, &target, 3)
            .copy(Path::new("/src/gone.txt"), Path::new("/out/gone.txt"), TargetSide::Deployment)
            .unwrap();
        assert_eq!(outcome, CopyOutcome::SourceVanished);
        assert!(!target.exists(Path::new("/out/gone.txt")));
    }

    #[test]
    fn directories_bypass_the_lock() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        source.add_dir("/src/dir");
        target.deny_locks("/out/dir", 100);

        let outcome = ops(&source, &target, 1)
            .copy(Path::new("/src/dir"), Path::new("/out/dir"), TargetSide::Deployment)
            .unwrap();
        assert_eq!(outcome, CopyOutcome::CreatedDir);
        assert!(target.is_dir(Path::new("/out/dir")));
    }

    #[test]
    fn locked_target_succeeds_after_retries() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        source.add_file("/src/f.txt", "v2");
        target.deny_locks("/out/f.txt", 2);

        let outcome = ops(&source, &target, 3)
            .copy(Path::new("/src/f.txt"), Path::new("/out/f.txt"), TargetSide::Deployment)
            .unwrap();
        assert_eq!(outcome, CopyOutcome::Copied { bytes: 2 });
        assert_eq!(
            target.file_content(PathBuf::from("/out/f.txt")),
            Some(b"v2".to_vec())
        );
    }

    #[test]
    fn persistently_locked_target_exhausts_retries() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        source.add_file("/src/f.txt", "v2");
        target.deny_locks("/out/f.txt", 100);

        let err = ops(&source, &target, 3)
            .copy(Path::new("/src/f.txt"), Path::new("/out/f.txt"), TargetSide::Deployment)
            .unwrap_err();
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn source_side_writes_land_on_the_source_filesystem() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        source.add_file("/src/f.txt", "local");

        let outcome = ops(&source, &target, 3)
            .copy(
                Path::new("/src/f.txt"),
                Path::new("/src/copy/f.txt"),
                TargetSide::Source,
            )
            .unwrap();
        assert_eq!(outcome, CopyOutcome::Copied { bytes: 5 });
        assert_eq!(
            source.file_content(PathBuf::from("/src/copy/f.txt")),
            Some(b"local".to_vec())
        );
        assert!(!target.exists(Path::new("/src/copy/f.txt")));
    }

    #[test]
    fn directory_delete_removes_the_whole_tree() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        target.add_file("/out/dir/a.txt", "x");
        target.add_file("/out/dir/sub/b.txt", "y");

        ops(&source, &target, 1)
            .delete(Path::new("/out/dir"), TargetSide::Deployment, true)
            .unwrap();
        assert!(!target.exists(Path::new("/out/dir")));
        assert!(!target.exists(Path::new("/out/dir/sub/b.txt")));
        // Deleting again is fine.
        ops(&source, &target, 1)
            .delete(Path::new("/out/dir"), TargetSide::Deployment, true)
            .unwrap();
    }

    #[test]
    fn file_delete_removes_a_file_target() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        target.add_file("/out/a.txt", "x");

        ops(&source, &target, 1)
            .delete(Path::new("/out/a.txt"), TargetSide::Deployment, false)
            .unwrap();
        assert!(!target.exists(Path::new("/out/a.txt")));
    }

    #[test]
    fn file_delete_leaves_a_directory_target_in_place() {
        let source = MockFileSystem::new();
        let target = MockFileSystem::new();
        target.add_file("/out/name/inner.txt", "x");

        ops(&source, &target, 1)
            .delete(Path::new("/out/name"), TargetSide::Deployment, false)
            .unwrap();
        assert!(target.exists(Path::new("/out/name/inner.txt")));
    }
}
