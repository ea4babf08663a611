#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use hotsync::model::DeploymentSpec;

/// Builder for `DeploymentSpec` to simplify test setup.
pub struct DeploymentSpecBuilder {
    spec: DeploymentSpec,
}

impl DeploymentSpecBuilder {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            spec: DeploymentSpec {
                source: source.into(),
                target: target.into(),
                base: None,
                enabled: true,
                unpack: false,
                redeploy_on_change: false,
                use_source_filesystem_only: false,
            },
        }
    }

    pub fn base(mut self, base: impl Into<PathBuf>) -> Self {
        self.spec.base = Some(base.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.spec.enabled = false;
        self
    }

    pub fn redeploy_on_change(mut self, val: bool) -> Self {
        self.spec.redeploy_on_change = val;
        self
    }

    pub fn use_source_filesystem_only(mut self, val: bool) -> Self {
        self.spec.use_source_filesystem_only = val;
        self
    }

    pub fn unpack(mut self, val: bool) -> Self {
        self.spec.unpack = val;
        self
    }

    pub fn build(self) -> DeploymentSpec {
        self.spec
    }
}

/// Create a directory tree under `root` from `(relative path, content)`
/// pairs. A trailing `/` in the path creates an empty directory instead.
pub fn populate_tree(root: &Path, entries: &[(&str, &str)]) {
    for (relative, content) in entries {
        let path = root.join(relative);
        if relative.ends_with('/') {
            fs::create_dir_all(&path).expect("creating directory");
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("creating parent directory");
        }
        fs::write(&path, content).expect("writing file");
    }
}

/// Fresh temp dir for a test tree.
pub fn temp_root() -> tempfile::TempDir {
    tempfile::tempdir().expect("creating temp dir")
}
