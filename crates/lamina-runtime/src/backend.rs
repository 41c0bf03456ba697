use crate::isolation::{ChrootIsolation, Isolation};
use crate::mock::{MockIsolation, MockRepository, MockUnionMount};
use crate::overlay::{FuseOverlayMount, UnionMount};
use crate::package::{PackageRepository, SystemRepository};
use crate::RuntimeError;

/// The three collaborators a layer manager drives, chosen together.
pub struct Backend {
    pub name: &'static str,
    pub mounter: Box<dyn UnionMount>,
    pub isolation: Box<dyn Isolation>,
    pub repository: Box<dyn PackageRepository>,
}

impl Backend {
    pub fn fuse(isolate_network: bool) -> Self {
        Self {
            name: "fuse",
            mounter: Box::new(FuseOverlayMount::new()),
            isolation: Box::new(ChrootIsolation::new(isolate_network)),
            repository: Box::new(SystemRepository::new()),
        }
    }

    pub fn mock() -> Self {
        Self::from_mocks(
            MockUnionMount::new(),
            MockIsolation::new(),
            MockRepository::new(),
        )
    }

    /// Build a backend from mock handles the caller keeps clones of.
    pub fn from_mocks(
        mounter: MockUnionMount,
        isolation: MockIsolation,
        repository: MockRepository,
    ) -> Self {
        Self {
            name: "mock",
            mounter: Box::new(mounter),
            isolation: Box::new(isolation),
            repository: Box::new(repository),
        }
    }

    /// Whether this backend needs host tools (fuse-overlayfs, unshare, ...).
    pub fn needs_host_tools(&self) -> bool {
        self.name != "mock"
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("mounter", &self.mounter.name())
            .field("isolation", &self.isolation.name())
            .field("repository", &self.repository.name())
            .finish()
    }
}

pub fn select_backend(name: &str, isolate_network: bool) -> Result<Backend, RuntimeError> {
    match name {
        "fuse" => Ok(Backend::fuse(isolate_network)),
        "mock" => Ok(Backend::mock()),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
