//! Layer stack management for Lamina.
//!
//! This crate ties the project layout and the runtime collaborators together
//! into the `LayerManager`, which composes per-part overlay stacks and runs
//! package operations inside the merged view, and into the scoped sessions
//! (`LayerMount`, `PackageCacheMount`) that pair every mount with exactly one
//! unmount. It also provides the mount-state machine, the leaked-process guard,
//! work-directory locking, and the `OverlayStep` build driver.

pub mod concurrency;
pub mod guard;
pub mod lifecycle;
pub mod manager;
pub mod resolver;
pub mod session;
pub mod step;

pub use concurrency::{install_signal_handler, shutdown_requested, LockState, WorkLock};
pub use guard::ProcessGuard;
pub use lifecycle::{validate_transition, MountState};
pub use manager::{compose_lower_dirs, LayerManager};
pub use session::{LayerMount, PackageCacheMount};
pub use step::{OverlayStep, PartInstall, StepReport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("part not found: {0}")]
    PartNotFound(String),
    #[error("project error: {0}")]
    Project(#[from] lamina_schema::ProjectError),
    #[error("runtime error: {0}")]
    Runtime(#[from] lamina_runtime::RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("interrupted before part '{0}'")]
    Interrupted(String),
    #[error("work lock: held by {}", describe_holder(.pid))]
    WorkLockHeld { pid: Option<u32> },
}

fn describe_holder(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!("pid {pid}"),
        None => "another process".to_owned(),
    }
}
