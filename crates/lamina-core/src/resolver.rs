use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Resolver configuration, relative to the root of the merged view.
pub const RESOLV_CONF: &str = "etc/resolv.conf";

/// Replace a symlink at `path` with an empty regular file.
///
/// Returns `true` if the file was replaced. A regular file or a missing path
/// is left alone.
pub fn replace_symlink_with_empty_file(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(path)?;
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
