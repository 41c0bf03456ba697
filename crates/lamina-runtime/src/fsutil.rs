use std::path::Path;

/// Create `path` and any missing parents. An existing directory is not an error.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Remove a directory tree without failing. A missing tree is silently
/// skipped; any other removal error is logged at debug and dropped.
pub fn remove_tree_best_effort(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("ignoring failure to remove {}: {e}", path.display());
        }
    }
}
