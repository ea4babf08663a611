// src/model/deployment.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::{HotSyncError, Result};

/// One mapping from a source directory to a target location inside the
/// exploded deployment.
///
/// Deployments form an owned tree: `children` is keyed by the child's
/// source path, and a child owns its own subtree. There are no parent
/// pointers. `depth` is 0 for roots and increases towards the leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub source: PathBuf,
    pub target: PathBuf,
    pub base: Option<PathBuf>,
    pub enabled: bool,
    pub unpack: bool,
    pub redeploy_on_change: bool,
    pub use_source_filesystem_only: bool,
    pub depth: u32,
    pub children: BTreeMap<PathBuf, Vec<Deployment>>,
}

/// Flat deployment description, before the forest is assembled.
///
/// Paths may still be relative here; [`build_forest`] normalizes them
/// against the session base/target-base before nesting.
#[derive(Debug, Clone)]
pub struct DeploymentSpec {
    pub source: PathBuf,
    pub target: PathBuf,
    pub base: Option<PathBuf>,
    pub enabled: bool,
    pub unpack: bool,
    pub redeploy_on_change: bool,
    pub use_source_filesystem_only: bool,
}

impl Deployment {
    /// Depth-first traversal over this deployment and all its descendants.
    pub fn flatten(&self) -> Vec<&Deployment> {
        let mut out = vec![self];
        for children in self.children.values() {
            for child in children {
                out.extend(child.flatten());
            }
        }
        out
    }

    /// Source paths of the direct child deployments.
    ///
    /// These subtrees belong to the children and must be excluded from this
    /// deployment's own watch registration, so that an event inside a child
    /// resolves to the child even when the child's target is remapped
    /// outside this deployment's target.
    pub fn direct_child_sources(&self) -> Vec<PathBuf> {
        self.children.keys().cloned().collect()
    }

    /// First path segment of `target` relative to the target base path:
    /// the deployed archive this deployment writes into.
    ///
    /// `None` when the target is the base itself or lies outside it.
    pub fn enclosing_target_archive(&self, target_base: &Path) -> Option<PathBuf> {
        let relative = self.target.strip_prefix(target_base).ok()?;
        relative
            .components()
            .next()
            .map(|c| PathBuf::from(c.as_os_str()))
    }

    fn validate(&self) -> Result<()> {
        if let Some(base) = &self.base {
            if !self.source.starts_with(base) {
                return Err(HotSyncError::ConfigError(format!(
                    "deployment base {} is not a prefix of source {}",
                    base.display(),
                    self.source.display()
                )));
            }
        }
        Ok(())
    }
}

impl DeploymentSpec {
    /// Resolve relative paths against the session base paths.
    ///
    /// `source` and `base` resolve against `base_path`; `target` resolves
    /// against `target_base_path`, or against `base_path` for deployments
    /// that only ever touch the source filesystem.
    fn normalize(mut self, base_path: &Path, target_base_path: &Path) -> Self {
        if !self.source.is_absolute() {
            self.source = base_path.join(&self.source);
        }
        if !self.target.is_absolute() {
            let root = if self.use_source_filesystem_only {
                base_path
            } else {
                target_base_path
            };
            self.target = root.join(&self.target);
        }
        if let Some(base) = self.base.take() {
            self.base = Some(if base.is_absolute() {
                base
            } else {
                base_path.join(base)
            });
        }
        self
    }
}

/// Assemble a deployment forest from flat specs.
///
/// Each entry is normalized, then nested under the deployment with the
/// longest source path that encloses its own source; specs with no
/// enclosing deployment become roots. Depths are assigned afterwards,
/// 0 at the roots.
pub fn build_forest(
    specs: Vec<DeploymentSpec>,
    base_path: &Path,
    target_base_path: &Path,
) -> Result<Vec<Deployment>> {
    let mut nodes: Vec<Deployment> = specs
        .into_iter()
        .map(|spec| {
            let spec = spec.normalize(base_path, target_base_path);
            Deployment {
                source: spec.source,
                target: spec.target,
                base: spec.base,
                enabled: spec.enabled,
                unpack: spec.unpack,
                redeploy_on_change: spec.redeploy_on_change,
                use_source_filesystem_only: spec.use_source_filesystem_only,
                depth: 0,
                children: BTreeMap::new(),
            }
        })
        .collect();

    for node in &nodes {
        node.validate()?;
    }

    let duplicate = find_duplicate_source(&nodes);
    if let Some(source) = duplicate {
        return Err(HotSyncError::ConfigError(format!(
            "two deployments share the same source path: {}",
            source.display()
        )));
    }

    // Insert shallowest sources first so an enclosing deployment is already
    // in the forest when its children arrive.
    nodes.sort_by(|a, b| a.source.components().count().cmp(&b.source.components().count()));

    let mut roots: Vec<Deployment> = Vec::new();
    for node in nodes {
        insert_into_forest(&mut roots, node);
    }

    for root in &mut roots {
        assign_depths(root, 0);
    }
    Ok(roots)
}

fn find_duplicate_source(nodes: &[Deployment]) -> Option<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    for node in nodes {
        if !seen.insert(node.source.clone()) {
            return Some(node.source.clone());
        }
    }
    None
}

fn insert_into_forest(roots: &mut Vec<Deployment>, node: Deployment) {
    for root in roots.iter_mut() {
        if node.source.starts_with(&root.source) && node.source != root.source {
            insert_into_tree(root, node);
            return;
        }
    }
    roots.push(node);
}

fn insert_into_tree(parent: &mut Deployment, node: Deployment) {
    for children in parent.children.values_mut() {
        for child in children.iter_mut() {
            if node.source.starts_with(&child.source) && node.source != child.source {
                insert_into_tree(child, node);
                return;
            }
        }
    }
    parent
        .children
        .entry(node.source.clone())
        .or_default()
        .push(node);
}

fn assign_depths(node: &mut Deployment, depth: u32) {
    node.depth = depth;
    for children in node.children.values_mut() {
        for child in children.iter_mut() {
            assign_depths(child, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(source: &str, target: &str) -> DeploymentSpec {
        DeploymentSpec {
            source: PathBuf::from(source),
            target: PathBuf::from(target),
            base: None,
            enabled: true,
            unpack: false,
            redeploy_on_change: false,
            use_source_filesystem_only: false,
        }
    }

    #[test]
    fn nested_sources_become_children() {
        let forest = build_forest(
            vec![spec("/src/a", "/out/a"), spec("/src/a/b", "/out/other/b")],
            Path::new("/src"),
            Path::new("/out"),
        )
        .unwrap();

        assert_eq!(forest.len(), 1);
        let root = &forest[0];
        assert_eq!(root.depth, 0);
        let child = &root.children[&PathBuf::from("/src/a/b")][0];
        assert_eq!(child.depth, 1);
        assert_eq!(child.target, PathBuf::from("/out/other/b"));
        assert_eq!(
            root.direct_child_sources(),
            vec![PathBuf::from("/src/a/b")]
        );
    }

    #[test]
    fn flatten_is_depth_first_and_complete() {
        let forest = build_forest(
            vec![
                spec("/src/a", "/out/a"),
                spec("/src/a/b", "/out/b"),
                spec("/src/a/b/c", "/out/c"),
                spec("/src/z", "/out/z"),
            ],
            Path::new("/src"),
            Path::new("/out"),
        )
        .unwrap();

        let flat: Vec<&Path> = forest
            .iter()
            .flat_map(|d| d.flatten())
            .map(|d| d.source.as_path())
            .collect();
        assert_eq!(
            flat,
            vec![
                Path::new("/src/a"),
                Path::new("/src/a/b"),
                Path::new("/src/a/b/c"),
                Path::new("/src/z"),
            ]
        );
    }

    #[test]
    fn relative_paths_resolve_against_bases() {
        let forest = build_forest(
            vec![spec("web/classes", "app.war/WEB-INF/classes")],
            Path::new("/project"),
            Path::new("/deployments"),
        )
        .unwrap();
        assert_eq!(forest[0].source, PathBuf::from("/project/web/classes"));
        assert_eq!(
            forest[0].target,
            PathBuf::from("/deployments/app.war/WEB-INF/classes")
        );
    }

    #[test]
    fn enclosing_archive_is_first_target_segment() {
        let forest = build_forest(
            vec![spec("web/classes", "app.war/WEB-INF/classes")],
            Path::new("/project"),
            Path::new("/deployments"),
        )
        .unwrap();
        assert_eq!(
            forest[0].enclosing_target_archive(Path::new("/deployments")),
            Some(PathBuf::from("app.war"))
        );
        assert_eq!(
            forest[0].enclosing_target_archive(Path::new("/elsewhere")),
            None
        );
    }

    #[test]
    fn base_outside_source_is_rejected() {
        let mut bad = spec("/src/a", "/out/a");
        bad.base = Some(PathBuf::from("/unrelated"));
        let err = build_forest(vec![bad], Path::new("/src"), Path::new("/out"));
        assert!(err.is_err());
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let err = build_forest(
            vec![spec("/src/a", "/out/a"), spec("/src/a", "/out/b")],
            Path::new("/src"),
            Path::new("/out"),
        );
        assert!(err.is_err());
    }
}
