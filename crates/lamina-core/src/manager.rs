use crate::lifecycle::{validate_transition, MountState};
use crate::resolver::{replace_symlink_with_empty_file, RESOLV_CONF};
use crate::CoreError;
use lamina_runtime::fsutil::{ensure_dir, remove_tree_best_effort};
use lamina_runtime::package::TRANSIENT_CACHE_DIR;
use lamina_runtime::{
    Backend, IsolatedRoot, Isolation, OverlayStack, PackageRepository, RuntimeError, UnionMount,
};
use lamina_schema::{Part, Project, ProjectInfo};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lower directories for a stack, highest precedence first.
///
/// Built bottom-up as `[base] + [cache] + layers_below` and then reversed,
/// because the union mount gives the leftmost lower directory precedence.
pub fn compose_lower_dirs(
    base: &Path,
    cache: Option<&Path>,
    layers_below: &[PathBuf],
) -> Vec<PathBuf> {
    let mut lowers = Vec::with_capacity(layers_below.len() + 2);
    lowers.push(base.to_path_buf());
    if let Some(cache) = cache {
        lowers.push(cache.to_path_buf());
    }
    lowers.extend(layers_below.iter().cloned());
    lowers.reverse();
    lowers
}

#[derive(Debug)]
struct ActiveMount {
    stack: OverlayStack,
    mountpoint: PathBuf,
}

/// Owns the part layers, the base layer and the package cache of one project,
/// and mounts at most one stack of them at a time.
pub struct LayerManager {
    info: ProjectInfo,
    parts: Vec<Part>,
    base_layer: Option<PathBuf>,
    backend_name: &'static str,
    mounter: Box<dyn UnionMount>,
    isolation: Box<dyn Isolation>,
    repository: Box<dyn PackageRepository>,
    active: Option<ActiveMount>,
}

impl LayerManager {
    pub fn new(
        info: ProjectInfo,
        parts: Vec<Part>,
        base_layer: Option<PathBuf>,
        backend: Backend,
    ) -> Self {
        Self {
            info,
            parts,
            base_layer,
            backend_name: backend.name,
            mounter: backend.mounter,
            isolation: backend.isolation,
            repository: backend.repository,
            active: None,
        }
    }

    pub fn from_project(project: &Project, backend: Backend) -> Self {
        Self::new(
            project.info.clone(),
            project.parts.clone(),
            project.base_layer.clone(),
            backend,
        )
    }

    pub fn state(&self) -> MountState {
        if self.active.is_some() {
            MountState::Mounted
        } else {
            MountState::Unmounted
        }
    }

    pub fn active_stack(&self) -> Option<&OverlayStack> {
        self.active.as_ref().map(|a| &a.stack)
    }

    pub fn has_base_layer(&self) -> bool {
        self.base_layer.is_some()
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn project_info(&self) -> &ProjectInfo {
        &self.info
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn mount_dir(&self) -> PathBuf {
        self.info.overlay_mount_dir()
    }

    fn require_base_layer(&self, what: &str) -> Result<&Path, CoreError> {
        self.base_layer.as_deref().ok_or_else(|| {
            CoreError::IllegalState(format!("request to mount {what} without a base layer"))
        })
    }

    fn require_active(&self, op: &str) -> Result<&ActiveMount, CoreError> {
        self.active.as_ref().ok_or_else(|| {
            CoreError::IllegalState(format!("cannot {op}: overlay filesystem is not mounted"))
        })
    }

    /// The stack `mount_layer` would mount for `part_name`, without mounting.
    pub fn plan(&self, part_name: &str, pkg_cache: bool) -> Result<OverlayStack, CoreError> {
        let base = self.require_base_layer("the overlay")?;
        let index = self
            .parts
            .iter()
            .position(|p| p.name == part_name)
            .ok_or_else(|| CoreError::PartNotFound(part_name.to_owned()))?;

        let cache = pkg_cache.then(|| self.info.overlay_packages_dir());
        let below: Vec<PathBuf> = self.parts[..index]
            .iter()
            .map(|p| p.layer_dir.clone())
            .collect();
        let lowers = compose_lower_dirs(base, cache.as_deref(), &below);

        Ok(OverlayStack::new(
            lowers,
            self.parts[index].layer_dir.clone(),
            self.info.overlay_work_dir(),
        ))
    }

    /// Mount the stack for `part_name`: every earlier part's layer over the
    /// base layer (and the package cache, if requested), with the part's own
    /// layer as the writable upper directory.
    pub fn mount_layer(&mut self, part_name: &str, pkg_cache: bool) -> Result<(), CoreError> {
        self.require_base_layer("the overlay")?;
        validate_transition(self.state(), MountState::Mounted)?;
        let stack = self.plan(part_name, pkg_cache)?;
        debug!(
            "stack for part '{part_name}': lower={} upper={}",
            stack.lowerdir_option(),
            stack.upper_dir.display()
        );
        info!("mounting overlay for part '{part_name}'");
        self.mount_stack(stack)
    }

    /// Mount the package cache as the writable layer over the base layer.
    pub fn mount_package_cache(&mut self) -> Result<(), CoreError> {
        let base = self
            .require_base_layer("the overlay package cache")?
            .to_path_buf();
        validate_transition(self.state(), MountState::Mounted)?;
        let stack = OverlayStack::new(
            vec![base],
            self.info.overlay_packages_dir(),
            self.info.overlay_work_dir(),
        );
        info!("mounting overlay package cache");
        self.mount_stack(stack)
    }

    fn mount_stack(&mut self, stack: OverlayStack) -> Result<(), CoreError> {
        let mountpoint = self.mount_dir();
        self.mounter.mount(&stack, &mountpoint)?;
        self.active = Some(ActiveMount { stack, mountpoint });
        Ok(())
    }

    /// Tear down the active stack. The record is kept if the unmount fails,
    /// since the view is then still mounted.
    pub fn unmount(&mut self) -> Result<(), CoreError> {
        let active = self.require_active("unmount")?;
        info!("unmounting overlay at {}", active.mountpoint.display());
        self.mounter.unmount(&active.mountpoint)?;
        self.active = None;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<(), CoreError> {
        ensure_dir(&self.info.overlay_mount_dir())?;
        ensure_dir(&self.info.overlay_packages_dir())?;
        ensure_dir(&self.info.overlay_work_dir())?;
        Ok(())
    }

    pub fn refresh_package_index(&self) -> Result<(), CoreError> {
        info!("refreshing package index");
        let repository = &*self.repository;
        self.run_isolated("refresh the package index", &mut |root| {
            repository.refresh_index(root)
        })
    }

    pub fn download_packages(&self, packages: &[String]) -> Result<(), CoreError> {
        info!("downloading packages: {}", packages.join(" "));
        let repository = &*self.repository;
        self.run_isolated("download packages", &mut |root| {
            repository.download(root, packages)
        })
    }

    /// Install into the merged view, then drop the package manager's transient
    /// cache so it does not end up in the part's layer.
    pub fn install_packages(&self, packages: &[String]) -> Result<(), CoreError> {
        info!("installing packages: {}", packages.join(" "));
        let repository = &*self.repository;
        self.run_isolated("install packages", &mut |root| {
            repository.install(root, packages)
        })?;
        remove_tree_best_effort(&self.mount_dir().join(TRANSIENT_CACHE_DIR));
        Ok(())
    }

    /// Replace a symlinked `etc/resolv.conf` in the merged view with an empty
    /// file, so the isolation has a real file to bind the host resolver onto.
    pub fn fix_isolation_root_resolver(&self) -> Result<(), CoreError> {
        let resolv = self.mount_dir().join(RESOLV_CONF);
        if replace_symlink_with_empty_file(&resolv)? {
            debug!("replaced symlinked {} with an empty file", resolv.display());
        }
        Ok(())
    }

    fn run_isolated(
        &self,
        op: &str,
        body: &mut dyn FnMut(&dyn IsolatedRoot) -> Result<(), RuntimeError>,
    ) -> Result<(), CoreError> {
        let active = self.require_active(op)?;
        match self.isolation.enter(&active.mountpoint, body) {
            Ok(()) => Ok(()),
            Err(RuntimeError::Terminated { signal })
                if Some(signal) == self.isolation.teardown_signal() =>
            {
                warn!(
                    "{} isolation ended with its teardown signal {signal} during '{op}'; ignoring",
                    self.isolation.name()
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for LayerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerManager")
            .field("work_dir", &self.info.work_dir())
            .field("parts", &self.parts.len())
            .field("base_layer", &self.base_layer)
            .field("backend", &self.backend_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
