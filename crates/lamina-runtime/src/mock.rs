use crate::isolation::{IsolatedRoot, Isolation};
use crate::overlay::{OverlayStack, UnionMount};
use crate::package::{PackageRepository, TRANSIENT_CACHE_DIR};
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Mount {
        stack: OverlayStack,
        mountpoint: PathBuf,
    },
    Unmount {
        mountpoint: PathBuf,
    },
}

#[derive(Debug, Default)]
struct MountState {
    calls: Vec<MountCall>,
    mounted: Option<PathBuf>,
}

/// Records mount calls without touching the kernel. Clones share state, so a
/// test can keep one handle and give another to the code under test.
#[derive(Debug, Clone, Default)]
pub struct MockUnionMount {
    state: Arc<Mutex<MountState>>,
    fail_mount: Arc<AtomicBool>,
    fail_unmount: Arc<AtomicBool>,
}

impl MockUnionMount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_mount(&self, fail: bool) {
        self.fail_mount.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_unmount(&self, fail: bool) {
        self.fail_unmount.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<MountCall> {
        lock(&self.state).calls.clone()
    }

    pub fn mounted(&self) -> Option<PathBuf> {
        lock(&self.state).mounted.clone()
    }

    /// Every stack mounted so far, in call order.
    pub fn stacks(&self) -> Vec<OverlayStack> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                MountCall::Mount { stack, .. } => Some(stack.clone()),
                MountCall::Unmount { .. } => None,
            })
            .collect()
    }

    pub fn unmount_count(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| matches!(c, MountCall::Unmount { .. }))
            .count()
    }
}

impl UnionMount for MockUnionMount {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn mount(&self, stack: &OverlayStack, mountpoint: &Path) -> Result<(), RuntimeError> {
        stack.validate()?;
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(RuntimeError::MountFailed("mock mount failure".to_owned()));
        }
        let mut state = lock(&self.state);
        if let Some(active) = &state.mounted {
            return Err(RuntimeError::MountFailed(format!(
                "{} is already a mount point",
                active.display()
            )));
        }
        std::fs::create_dir_all(mountpoint)?;
        state.calls.push(MountCall::Mount {
            stack: stack.clone(),
            mountpoint: mountpoint.to_path_buf(),
        });
        state.mounted = Some(mountpoint.to_path_buf());
        Ok(())
    }

    fn unmount(&self, mountpoint: &Path) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        state.calls.push(MountCall::Unmount {
            mountpoint: mountpoint.to_path_buf(),
        });
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(RuntimeError::UnmountFailed(
                "mock unmount failure".to_owned(),
            ));
        }
        if state.mounted.as_deref() != Some(mountpoint) {
            return Err(RuntimeError::UnmountFailed(format!(
                "{} is not mounted",
                mountpoint.display()
            )));
        }
        state.mounted = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct IsolationState {
    entered: Vec<PathBuf>,
    executed: Vec<Vec<String>>,
}

/// Runs the body directly against the root and records what it executes.
///
/// Behaves like a primitive that tears its isolated process down with
/// `SIGTERM` unless built with [`MockIsolation::without_teardown_signal`].
#[derive(Debug, Clone, Default)]
pub struct MockIsolation {
    state: Arc<Mutex<IsolationState>>,
    terminate_with: Option<i32>,
    no_teardown: bool,
}

impl MockIsolation {
    pub fn new() -> Self {
        Self::default()
    }

    /// After the body returns, report that the isolated process was killed by
    /// `signal`.
    #[must_use]
    pub fn terminating_with(mut self, signal: i32) -> Self {
        self.terminate_with = Some(signal);
        self
    }

    /// Report no teardown signal, like a primitive that never kills its own
    /// processes.
    #[must_use]
    pub fn without_teardown_signal(mut self) -> Self {
        self.no_teardown = true;
        self
    }

    pub fn entered(&self) -> Vec<PathBuf> {
        lock(&self.state).entered.clone()
    }

    pub fn executed(&self) -> Vec<Vec<String>> {
        lock(&self.state).executed.clone()
    }
}

struct MockRoot {
    root: PathBuf,
    state: Arc<Mutex<IsolationState>>,
}

impl IsolatedRoot for MockRoot {
    fn root(&self) -> &Path {
        &self.root
    }

    fn exec(&self, argv: &[String]) -> Result<(), RuntimeError> {
        if !argv.is_empty() {
            lock(&self.state).executed.push(argv.to_vec());
        }
        Ok(())
    }
}

impl Isolation for MockIsolation {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn enter(
        &self,
        root: &Path,
        body: &mut dyn FnMut(&dyn IsolatedRoot) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        lock(&self.state).entered.push(root.to_path_buf());
        let session = MockRoot {
            root: root.to_path_buf(),
            state: Arc::clone(&self.state),
        };
        body(&session)?;
        match self.terminate_with {
            Some(signal) => Err(RuntimeError::Terminated { signal }),
            None => Ok(()),
        }
    }

    fn teardown_signal(&self) -> Option<i32> {
        (!self.no_teardown).then_some(libc::SIGTERM)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    Refresh { root: PathBuf },
    Download { root: PathBuf, packages: Vec<String> },
    Install { root: PathBuf, packages: Vec<String> },
}

/// Fake package repository. Downloads drop `.pkg` files under the transient
/// cache; installs drop marker files under `.lamina-mock/installed`.
#[derive(Debug, Clone, Default)]
pub struct MockRepository {
    calls: Arc<Mutex<Vec<RepoCall>>>,
    fail: Arc<AtomicBool>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        lock(&self.calls).clone()
    }

    fn check_fail(&self, op: &str) -> Result<(), RuntimeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RuntimeError::ExecFailed(format!("mock {op} failure")));
        }
        Ok(())
    }

    fn write_cache_entries(root: &Path, packages: &[String]) -> Result<(), RuntimeError> {
        let cache = root.join(TRANSIENT_CACHE_DIR).join("lamina-mock");
        std::fs::create_dir_all(&cache)?;
        for pkg in packages {
            std::fs::write(cache.join(format!("{pkg}.pkg")), format!("{pkg}@0.0.0-mock"))?;
        }
        Ok(())
    }
}

impl PackageRepository for MockRepository {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn refresh_index(&self, root: &dyn IsolatedRoot) -> Result<(), RuntimeError> {
        lock(&self.calls).push(RepoCall::Refresh {
            root: root.root().to_path_buf(),
        });
        self.check_fail("refresh")
    }

    fn download(&self, root: &dyn IsolatedRoot, packages: &[String]) -> Result<(), RuntimeError> {
        lock(&self.calls).push(RepoCall::Download {
            root: root.root().to_path_buf(),
            packages: packages.to_vec(),
        });
        self.check_fail("download")?;
        Self::write_cache_entries(root.root(), packages)
    }

    fn install(&self, root: &dyn IsolatedRoot, packages: &[String]) -> Result<(), RuntimeError> {
        lock(&self.calls).push(RepoCall::Install {
            root: root.root().to_path_buf(),
            packages: packages.to_vec(),
        });
        self.check_fail("install")?;
        Self::write_cache_entries(root.root(), packages)?;
        let installed = root.root().join(".lamina-mock/installed");
        std::fs::create_dir_all(&installed)?;
        for pkg in packages {
            std::fs::write(installed.join(pkg), "0.0.0-mock")?;
        }
        Ok(())
    }
}
