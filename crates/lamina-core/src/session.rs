//! Scoped mount sessions.
//!
//! A session mounts a stack when it is opened and unmounts it exactly once when
//! it is closed, whether that happens through `finish`, at the end of a
//! `scope` closure, or in `Drop` after an early return or a panic. Before any
//! unmount the session checks that it is still running in the process that
//! opened it; a forked child that reaches the exit path is terminated instead.

use crate::guard::ProcessGuard;
use crate::manager::LayerManager;
use crate::CoreError;
use std::path::PathBuf;
use tracing::{error, warn};

struct ScopedMount<'m> {
    manager: &'m mut LayerManager,
    guard: ProcessGuard,
    released: bool,
}

impl<'m> ScopedMount<'m> {
    fn open(
        manager: &'m mut LayerManager,
        mount: impl FnOnce(&mut LayerManager) -> Result<(), CoreError>,
    ) -> Result<Self, CoreError> {
        let guard = ProcessGuard::new();
        manager.ensure_directories()?;
        mount(&mut *manager)?;
        // From here on, dropping `scoped` unmounts.
        let scoped = Self {
            manager,
            guard,
            released: false,
        };
        scoped.manager.fix_isolation_root_resolver()?;
        Ok(scoped)
    }

    fn release(&mut self) -> Result<(), CoreError> {
        self.guard.exit_if_foreign();
        self.released = true;
        self.manager.unmount()
    }
}

impl Drop for ScopedMount<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.release() {
            error!("failed to unmount overlay while leaving session: {e}");
        }
    }
}

/// Combine a session body's result with the result of closing the session.
/// An unmount failure wins over a body failure.
fn close<T>(body: Result<T, CoreError>, unmount: Result<(), CoreError>) -> Result<T, CoreError> {
    match (body, unmount) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(u)) => Err(u),
        (Err(e), Err(u)) => {
            warn!("session failed before unmount: {e}");
            Err(u)
        }
    }
}

/// A part's layer stack, mounted for the lifetime of this value.
pub struct LayerMount<'m> {
    inner: ScopedMount<'m>,
    part: String,
}

impl<'m> LayerMount<'m> {
    /// Ensure the overlay directories, mount the stack for `part`, and fix up
    /// the merged view's resolver configuration.
    pub fn new(
        manager: &'m mut LayerManager,
        part: &str,
        pkg_cache: bool,
    ) -> Result<Self, CoreError> {
        let inner = ScopedMount::open(manager, |m| m.mount_layer(part, pkg_cache))?;
        Ok(Self {
            inner,
            part: part.to_owned(),
        })
    }

    /// Run `body` with the stack for `part` mounted, then unmount.
    pub fn scope<T>(
        manager: &'m mut LayerManager,
        part: &str,
        pkg_cache: bool,
        body: impl FnOnce(&mut LayerMount<'m>) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut mount = Self::new(manager, part, pkg_cache)?;
        let result = body(&mut mount);
        close(result, mount.finish())
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    pub fn mount_dir(&self) -> PathBuf {
        self.inner.manager.mount_dir()
    }

    pub fn manager(&self) -> &LayerManager {
        &*self.inner.manager
    }

    pub fn install_packages(&self, packages: &[String]) -> Result<(), CoreError> {
        self.inner.manager.install_packages(packages)
    }

    /// Unmount now and report the result.
    pub fn finish(mut self) -> Result<(), CoreError> {
        self.inner.release()
    }
}

/// The package cache stack, mounted for the lifetime of this value.
pub struct PackageCacheMount<'m> {
    inner: ScopedMount<'m>,
}

impl<'m> PackageCacheMount<'m> {
    pub fn new(manager: &'m mut LayerManager) -> Result<Self, CoreError> {
        let inner = ScopedMount::open(manager, LayerManager::mount_package_cache)?;
        Ok(Self { inner })
    }

    /// Run `body` with the package cache mounted, then unmount.
    pub fn scope<T>(
        manager: &'m mut LayerManager,
        body: impl FnOnce(&mut PackageCacheMount<'m>) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut mount = Self::new(manager)?;
        let result = body(&mut mount);
        close(result, mount.finish())
    }

    pub fn mount_dir(&self) -> PathBuf {
        self.inner.manager.mount_dir()
    }

    pub fn manager(&self) -> &LayerManager {
        &*self.inner.manager
    }

    pub fn refresh_package_index(&self) -> Result<(), CoreError> {
        self.inner.manager.refresh_package_index()
    }

    pub fn download_packages(&self, packages: &[String]) -> Result<(), CoreError> {
        self.inner.manager.download_packages(packages)
    }

    /// Unmount now and report the result.
    pub fn finish(mut self) -> Result<(), CoreError> {
        self.inner.release()
    }
}
