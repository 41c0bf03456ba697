use serde::Serialize;
use std::path::{Path, PathBuf};

/// Directory layout of a project's work directory.
///
/// Every overlay path the layer manager touches is derived from here. Nothing
/// is created on construction; callers create directories on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    work_dir: PathBuf,
}

impl ProjectInfo {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    #[inline]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[inline]
    pub fn overlay_dir(&self) -> PathBuf {
        self.work_dir.join("overlay")
    }

    /// Merged view of the active layer stack.
    #[inline]
    pub fn overlay_mount_dir(&self) -> PathBuf {
        self.overlay_dir().join("overlay")
    }

    /// Downloaded packages, mounted as a layer between the base and the parts.
    #[inline]
    pub fn overlay_packages_dir(&self) -> PathBuf {
        self.overlay_dir().join("packages")
    }

    /// Scratch directory for the union mount. Shared by every stack.
    #[inline]
    pub fn overlay_work_dir(&self) -> PathBuf {
        self.overlay_dir().join("work")
    }

    #[inline]
    pub fn parts_dir(&self) -> PathBuf {
        self.work_dir.join("parts")
    }

    #[inline]
    pub fn part_layer_dir(&self, part_name: &str) -> PathBuf {
        self.parts_dir().join(part_name).join("layer")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.work_dir.join(".lamina.lock")
    }
}
