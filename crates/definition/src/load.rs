// SPDX-License-Identifier: MIT

//! Directory loader for definition files.

use crate::def::{DefinitionError, JobDefinition};
use std::path::Path;

/// Parse every `*.toml` file in `dir` into a definition.
///
/// Files that fail to parse or validate are skipped with a warning so one
/// broken document cannot take the rest of the directory down. Two files
/// claiming the same id is an error: silently picking one would make runs
/// depend on directory order.
pub fn load_dir(dir: &Path) -> Result<Vec<JobDefinition>, DefinitionError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| DefinitionError::Io(dir.to_path_buf(), e))?;

    let mut defs: Vec<JobDefinition> = Vec::new();
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    for path in paths {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable definition file");
                continue;
            }
        };
        match JobDefinition::from_toml(&text) {
            Ok(def) => {
                if defs.iter().any(|d| d.id == def.id) {
                    return Err(DefinitionError::Duplicate(def.id));
                }
                tracing::debug!(id = %def.id, path = %path.display(), "definition loaded");
                defs.push(def);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid definition file");
            }
        }
    }
    Ok(defs)
}

#[cfg(test)]
#[path = "load_tests.rs"]
mod tests;
