use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::ConfigError;

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn is_definition(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), ConfigError> {
    let mut entries = fs::read_dir(dir)
        .map_err(io_error(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(dir))?;
    entries.sort();

    for path in entries {
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() {
            walk(&path, found)?;
        } else if is_definition(&path) {
            found.push(path);
        }
    }
    Ok(())
}

/// Expands `paths` into definition files.
///
/// Directories are walked recursively in sorted order, skipping hidden
/// entries and files without a `yaml`, `yml` or `json` extension. Files
/// named explicitly are taken as they are.
pub fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ConfigError> {
    let mut found = Vec::new();
    for path in paths {
        let metadata = fs::metadata(path).map_err(io_error(path))?;
        if metadata.is_dir() {
            walk(path, &mut found)?;
        } else {
            found.push(path.clone());
        }
    }

    if found.is_empty() {
        return Err(ConfigError::NoDefinitions {
            paths: paths.iter().map(|p| p.display().to_string()).collect(),
        });
    }
    debug!(count = found.len(), "definition files discovered");
    Ok(found)
}
