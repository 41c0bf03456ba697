//! Mount, isolation, and package-manager plumbing for Lamina.
//!
//! This crate implements the collaborators the layer manager drives: the
//! `UnionMount` trait with a fuse-overlayfs implementation, the `Isolation`
//! trait with an unshare + chroot implementation, the `PackageRepository` trait
//! backed by the package manager found inside the isolated root, in-memory
//! mocks of all three, backend selection, and prerequisite checking.

pub mod backend;
pub mod fsutil;
pub mod isolation;
pub mod mock;
pub mod overlay;
pub mod package;
pub mod prereq;

pub use backend::{select_backend, Backend};
pub use isolation::{ChrootIsolation, IsolatedRoot, Isolation};
pub use overlay::{FuseOverlayMount, OverlayStack, UnionMount};
pub use package::{PackageManager, PackageRepository, SystemRepository};
pub use prereq::{check_overlay_prereqs, format_missing, unmet, HostProbe, LiveHost, Requirement};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("overlay mount failed: {0}")]
    MountFailed(String),
    #[error("overlay unmount failed: {0}")]
    UnmountFailed(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("isolated process terminated by signal {signal}")]
    Terminated { signal: i32 },
    #[error("no supported package manager found in {0} (supported: apt, dnf, zypper, pacman)")]
    NoPackageManager(String),
}
