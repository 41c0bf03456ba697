use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Who, if anyone, owns a project's work directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Not held, and the last holder released it.
    Free,
    /// Not held, but the last holder exited without releasing it, so a layer
    /// stack it mounted may still be mounted.
    Stale { pid: u32 },
    /// Held by a live process. `pid` is `None` while the holder has not yet
    /// recorded itself.
    Held { pid: Option<u32> },
}

/// Exclusive advisory lock on a project's work directory.
///
/// The mount point, work directory and package cache are shared by every
/// Lamina process pointed at the same project, so whole pipelines hold this
/// lock for as long as they may mount. The holder's PID is written into the
/// lock file and cleared on release.
pub struct WorkLock {
    file: File,
    path: PathBuf,
}

impl WorkLock {
    /// Block until the lock is held.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let mut file = open_lock_file(lock_path)?;
        if file.try_lock_exclusive().is_err() {
            match read_holder(&mut file) {
                Some(pid) => info!("waiting for work lock held by pid {pid}"),
                None => info!("waiting for work lock"),
            }
            file.lock_exclusive()?;
        }
        Self::claim(file, lock_path)
    }

    /// Take the lock without waiting. Contention reports the current holder.
    pub fn try_acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let mut file = open_lock_file(lock_path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(CoreError::WorkLockHeld {
                pid: read_holder(&mut file),
            });
        }
        Self::claim(file, lock_path)
    }

    /// Report the lock's state without keeping it.
    pub fn inspect(lock_path: &Path) -> Result<LockState, CoreError> {
        if !lock_path.exists() {
            return Ok(LockState::Free);
        }
        let mut file = open_lock_file(lock_path)?;
        if file.try_lock_exclusive().is_err() {
            return Ok(LockState::Held {
                pid: read_holder(&mut file),
            });
        }
        let leftover = read_holder(&mut file);
        file.unlock()?;
        Ok(leftover.map_or(LockState::Free, |pid| LockState::Stale { pid }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn claim(mut file: File, lock_path: &Path) -> Result<Self, CoreError> {
        if let Some(pid) = read_holder(&mut file) {
            warn!(
                "previous holder pid {pid} exited without releasing {}; \
                 an overlay may still be mounted",
                lock_path.display()
            );
        }
        let pid = std::process::id();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{pid}")?;
        file.sync_data()?;
        debug!("work lock {} taken by pid {pid}", lock_path.display());
        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }
}

impl Drop for WorkLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            debug!("cannot clear holder in {}: {e}", self.path.display());
        }
        let _ = self.file.unlock();
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Exit status of a second Ctrl-C, as a shell reports SIGINT.
const ABORT_STATUS: i32 = 130;

fn on_interrupt() {
    if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
        std::process::exit(ABORT_STATUS);
    }
    eprintln!("\ninterrupted: finishing the current part and unmounting (Ctrl-C again to abort)");
}

/// Record Ctrl-C so the running part completes and its stack is unmounted
/// before the build stops. A second Ctrl-C aborts at once.
pub fn install_signal_handler() {
    if let Err(e) = ctrlc::set_handler(on_interrupt) {
        warn!("cannot install Ctrl-C handler: {e}");
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("build").join(".lamina.lock")
    }

    #[test]
    fn holder_pid_is_recorded_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);

        let lock = WorkLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
        let recorded = std::fs::read_to_string(&path).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());

        drop(lock);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert_eq!(WorkLock::inspect(&path).unwrap(), LockState::Free);
    }

    #[test]
    fn contention_reports_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);

        let _held = WorkLock::acquire(&path).unwrap();
        let me = Some(std::process::id());
        assert!(matches!(
            WorkLock::try_acquire(&path),
            Err(CoreError::WorkLockHeld { pid }) if pid == me
        ));
        assert_eq!(WorkLock::inspect(&path).unwrap(), LockState::Held { pid: me });

        let Err(err) = WorkLock::try_acquire(&path) else {
            panic!("lock taken twice");
        };
        assert_eq!(
            err.to_string(),
            format!("work lock: held by pid {}", std::process::id())
        );
    }

    #[test]
    fn leftover_pid_without_lock_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "4242\n").unwrap();

        assert_eq!(
            WorkLock::inspect(&path).unwrap(),
            LockState::Stale { pid: 4242 }
        );
        // inspecting does not take or clear anything
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242\n");

        let lock = WorkLock::try_acquire(&path).unwrap();
        let recorded = std::fs::read_to_string(&path).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());
        drop(lock);
    }

    #[test]
    fn missing_lock_file_is_free_and_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        assert_eq!(WorkLock::inspect(&path).unwrap(), LockState::Free);
        assert!(!path.exists());
    }

    #[test]
    fn garbage_holder_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lamina.lock");
        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(WorkLock::inspect(&path).unwrap(), LockState::Free);
    }

    #[test]
    fn shutdown_not_requested_by_default() {
        assert!(!shutdown_requested());
    }
}
