// src/model/path_range.rs

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

/// Ordered chain of directories from `start` (inclusive) up to `end`
/// (exclusive).
///
/// For `start = /p` and `end = /p/m/target/classes` this yields
/// `/p`, `/p/m`, `/p/m/target`. These are the pass-through directories a
/// deployment must watch individually without treating their own content
/// as part of the deployment.
pub fn intermediate_chain(start: &Path, end: &Path) -> Result<Vec<PathBuf>> {
    let relative = match end.strip_prefix(start) {
        Ok(rel) => rel,
        Err(_) => bail!(
            "end path {} must start with start path {}",
            end.display(),
            start.display()
        ),
    };

    let mut chain = Vec::new();
    let mut current = start.to_path_buf();
    for component in relative.components() {
        chain.push(current.clone());
        current = current.join(component);
    }
    Ok(chain)
}
