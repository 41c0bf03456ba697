use crate::RuntimeError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// One union-mount configuration: read-only lowers, one writable upper, and the
/// scratch work directory the filesystem needs for copy-up.
///
/// `lower_dirs` is in mount order: the first entry takes precedence over the
/// ones after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayStack {
    pub lower_dirs: Vec<PathBuf>,
    pub upper_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl OverlayStack {
    pub fn new(lower_dirs: Vec<PathBuf>, upper_dir: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            lower_dirs,
            upper_dir,
            work_dir,
        }
    }

    /// Reject stacks the overlay option syntax cannot express.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.lower_dirs.is_empty() {
            return Err(RuntimeError::MountFailed(
                "cannot mount an overlay with no lower directories".to_owned(),
            ));
        }
        for path in self
            .lower_dirs
            .iter()
            .chain([&self.upper_dir, &self.work_dir])
        {
            let s = path.to_string_lossy();
            if s.contains(':') || s.contains(',') {
                return Err(RuntimeError::MountFailed(format!(
                    "overlay path contains a reserved character (':' or ','): {s}"
                )));
            }
        }
        Ok(())
    }

    pub fn lowerdir_option(&self) -> String {
        self.lower_dirs
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn mount_options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lowerdir_option(),
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Union-mount primitive: merge a stack into a single view at a mount point.
pub trait UnionMount: Send + Sync {
    fn name(&self) -> &str;

    fn mount(&self, stack: &OverlayStack, mountpoint: &Path) -> Result<(), RuntimeError>;

    fn unmount(&self, mountpoint: &Path) -> Result<(), RuntimeError>;
}

/// Unprivileged overlay mounts through fuse-overlayfs.
#[derive(Debug, Default)]
pub struct FuseOverlayMount;

impl FuseOverlayMount {
    pub fn new() -> Self {
        Self
    }
}

impl UnionMount for FuseOverlayMount {
    fn name(&self) -> &'static str {
        "fuse-overlayfs"
    }

    fn mount(&self, stack: &OverlayStack, mountpoint: &Path) -> Result<(), RuntimeError> {
        stack.validate()?;

        if is_mounted(mountpoint) {
            return Err(RuntimeError::MountFailed(format!(
                "{} is already a mount point",
                mountpoint.display()
            )));
        }

        for lower in &stack.lower_dirs {
            if !lower.is_dir() {
                return Err(RuntimeError::MountFailed(format!(
                    "lower directory does not exist: {}",
                    lower.display()
                )));
            }
        }

        for dir in [stack.upper_dir.as_path(), stack.work_dir.as_path(), mountpoint] {
            std::fs::create_dir_all(dir)?;
        }

        let options = stack.mount_options();
        debug!("fuse-overlayfs -o {options} {}", mountpoint.display());

        let output = Command::new("fuse-overlayfs")
            .arg("-o")
            .arg(&options)
            .arg(mountpoint)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                RuntimeError::MountFailed(format!(
                    "fuse-overlayfs not found or failed to start: {e}. Install with: apt install fuse-overlayfs"
                ))
            })?;

        if !output.status.success() {
            return Err(RuntimeError::MountFailed(format!(
                "fuse-overlayfs exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("mounted overlay at {}", mountpoint.display());
        Ok(())
    }

    fn unmount(&self, mountpoint: &Path) -> Result<(), RuntimeError> {
        if !is_mounted(mountpoint) {
            return Err(RuntimeError::UnmountFailed(format!(
                "{} is not mounted",
                mountpoint.display()
            )));
        }

        for tool in ["fusermount3", "fusermount"] {
            let _ = Command::new(tool)
                .arg("-u")
                .arg(mountpoint)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if !is_mounted(mountpoint) {
                info!("unmounted overlay at {}", mountpoint.display());
                return Ok(());
            }
        }

        Err(RuntimeError::UnmountFailed(format!(
            "{} is still mounted after fusermount3 -u and fusermount -u",
            mountpoint.display()
        )))
    }
}

/// Escape a path the way the kernel writes it into /proc/mounts.
fn escape_mount_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => out.push_str("\\040"),
            '\t' => out.push_str("\\011"),
            '\n' => out.push_str("\\012"),
            '\\' => out.push_str("\\134"),
            other => out.push(other),
        }
    }
    out
}

/// Check if a path is currently a mount point by inspecting /proc/mounts.
pub fn is_mounted(path: &Path) -> bool {
    let canonical = match std::fs::canonicalize(path) {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => path.to_string_lossy().to_string(),
    };
    let wanted = escape_mount_path(&canonical);
    match std::fs::read_to_string("/proc/mounts") {
        Ok(mounts) => mounts
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(wanted.as_str())),
        Err(_) => false,
    }
}
