// src/fs/markers.rs

//! Marker-file protocol.
//!
//! The consumer process (application server) scans the deployment directory
//! for zero-byte sentinel files:
//!
//! - `<archive>.dodeploy` — "please (re)deploy this archive".
//! - `<archive>.skipdeploy` — "ignore this archive, a write is in
//!   progress"; used to bracket multi-file operations such as unpacking.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use super::DeployFs;

pub const DODEPLOY_SUFFIX: &str = ".dodeploy";
pub const SKIPDEPLOY_SUFFIX: &str = ".skipdeploy";

fn marker_path(target_base: &Path, archive: &Path, suffix: &str) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(suffix);
    target_base.join(name)
}

/// Touch `<archive>.dodeploy` next to the deployed archive.
pub fn request_redeploy(fs: &dyn DeployFs, target_base: &Path, archive: &Path) -> Result<()> {
    fs.touch(&marker_path(target_base, archive, DODEPLOY_SUFFIX))
}

/// RAII bracket around an in-progress multi-file write into an archive.
///
/// Creating the guard touches `<archive>.skipdeploy`; calling
/// [`SkipDeployGuard::complete`] swaps it for `<archive>.dodeploy`.
/// Dropping the guard without completing removes the skip marker and does
/// not request a redeploy (the write is assumed to have failed).
pub struct SkipDeployGuard<'a> {
    fs: &'a dyn DeployFs,
    target_base: PathBuf,
    archive: PathBuf,
    completed: bool,
}

impl<'a> SkipDeployGuard<'a> {
    pub fn new(fs: &'a dyn DeployFs, target_base: &Path, archive: &Path) -> Result<Self> {
        fs.touch(&marker_path(target_base, archive, SKIPDEPLOY_SUFFIX))?;
        Ok(Self {
            fs,
            target_base: target_base.to_path_buf(),
            archive: archive.to_path_buf(),
            completed: false,
        })
    }

    /// Mark the bracketed write as finished: touch the dodeploy marker,
    /// then remove the skip marker.
    pub fn complete(mut self) -> Result<()> {
        self.fs
            .touch(&marker_path(&self.target_base, &self.archive, DODEPLOY_SUFFIX))?;
        self.fs.delete_if_exists(&marker_path(
            &self.target_base,
            &self.archive,
            SKIPDEPLOY_SUFFIX,
        ))?;
        self.completed = true;
        Ok(())
    }
}

impl Drop for SkipDeployGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let skip = marker_path(&self.target_base, &self.archive, SKIPDEPLOY_SUFFIX);
        if let Err(err) = self.fs.delete_if_exists(&skip) {
            warn!(path = ?skip, error = %err, "failed to remove skipdeploy marker");
        }
    }
}
