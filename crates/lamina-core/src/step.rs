use crate::concurrency::shutdown_requested;
use crate::manager::LayerManager;
use crate::session::{LayerMount, PackageCacheMount};
use crate::CoreError;
use lamina_schema::overlay_packages_of;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartInstall {
    pub part: String,
    pub packages: Vec<String>,
}

/// What an overlay step did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// No base layer is configured, so nothing was mounted.
    pub skipped: bool,
    pub downloaded: Vec<String>,
    pub installed: Vec<PartInstall>,
}

/// Drives the overlay step of a build: fill the package cache once, then
/// install each part's overlay packages into its own layer, in part order.
pub struct OverlayStep<'m> {
    manager: &'m mut LayerManager,
    interrupted: fn() -> bool,
}

impl<'m> OverlayStep<'m> {
    pub fn new(manager: &'m mut LayerManager) -> Self {
        Self {
            manager,
            interrupted: shutdown_requested,
        }
    }

    /// Replace the check consulted before each part.
    #[must_use]
    pub fn with_interrupt_check(mut self, interrupted: fn() -> bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// Refresh the package index and download `packages` into the package
    /// cache. Returns `false` without mounting if there is nothing to do.
    pub fn fetch(&mut self, packages: &[String]) -> Result<bool, CoreError> {
        if !self.manager.has_base_layer() {
            debug!("no base layer configured; skipping package fetch");
            return Ok(false);
        }
        if packages.is_empty() {
            debug!("no overlay packages to fetch");
            return Ok(false);
        }
        info!("fetching {} overlay package(s)", packages.len());
        PackageCacheMount::scope(&mut *self.manager, |cache| {
            cache.refresh_package_index()?;
            cache.download_packages(packages)
        })?;
        Ok(true)
    }

    pub fn run(&mut self) -> Result<StepReport, CoreError> {
        let mut report = StepReport::default();
        if !self.manager.has_base_layer() {
            info!("no base layer configured; overlay step skipped");
            report.skipped = true;
            return Ok(report);
        }

        let parts = self.manager.parts().to_vec();
        let all_packages = overlay_packages_of(&parts);
        let cached = self.fetch(&all_packages)?;
        if cached {
            report.downloaded = all_packages;
        }

        for part in parts.iter().filter(|p| !p.overlay_packages.is_empty()) {
            if (self.interrupted)() {
                return Err(CoreError::Interrupted(part.name.clone()));
            }
            info!("installing overlay packages for part '{}'", part.name);
            LayerMount::scope(&mut *self.manager, &part.name, cached, |mount| {
                mount.install_packages(&part.overlay_packages)
            })?;
            report.installed.push(PartInstall {
                part: part.name.clone(),
                packages: part.overlay_packages.clone(),
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::MountState;
    use lamina_runtime::mock::{MockIsolation, MockRepository, MockUnionMount, RepoCall};
    use lamina_runtime::Backend;
    use lamina_schema::{Part, ProjectInfo};
    use std::path::{Path, PathBuf};

    fn part(root: &Path, name: &str, packages: &[&str]) -> Part {
        Part {
            name: name.to_owned(),
            layer_dir: root.join(name),
            overlay_packages: packages.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    fn manager(
        root: &Path,
        base: Option<PathBuf>,
        parts: Vec<Part>,
        mounter: &MockUnionMount,
        repo: &MockRepository,
    ) -> LayerManager {
        LayerManager::new(
            ProjectInfo::new(root.join("build")),
            parts,
            base,
            Backend::from_mocks(mounter.clone(), MockIsolation::new(), repo.clone()),
        )
    }

    #[test]
    fn run_without_base_layer_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = MockUnionMount::new();
        let parts = vec![part(dir.path(), "a", &["hello"])];
        let mut mgr = manager(dir.path(), None, parts, &mounter, &MockRepository::new());

        let report = OverlayStep::new(&mut mgr).run().unwrap();
        assert!(report.skipped);
        assert!(mounter.calls().is_empty());
    }

    #[test]
    fn run_fetches_then_installs_per_part() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = MockUnionMount::new();
        let repo = MockRepository::new();
        let parts = vec![
            part(dir.path(), "a", &["hello", "jq"]),
            part(dir.path(), "b", &[]),
            part(dir.path(), "c", &["jq", "curl"]),
        ];
        let base = dir.path().join("base");
        let mut mgr = manager(dir.path(), Some(base.clone()), parts, &mounter, &repo);

        let report = OverlayStep::new(&mut mgr).run().unwrap();
        assert!(!report.skipped);
        assert_eq!(report.downloaded, ["hello", "jq", "curl"]);
        assert_eq!(
            report.installed,
            [
                PartInstall {
                    part: "a".to_owned(),
                    packages: vec!["hello".to_owned(), "jq".to_owned()],
                },
                PartInstall {
                    part: "c".to_owned(),
                    packages: vec!["jq".to_owned(), "curl".to_owned()],
                },
            ]
        );

        // cache stack, then a, then c (b has no packages and is never mounted)
        let stacks = mounter.stacks();
        assert_eq!(stacks.len(), 3);
        assert_eq!(stacks[0].lower_dirs, [base.clone()]);
        assert_eq!(stacks[1].upper_dir, dir.path().join("a"));
        assert_eq!(
            stacks[2].lower_dirs,
            [
                dir.path().join("b"),
                dir.path().join("a"),
                dir.path().join("build/overlay/packages"),
                base,
            ]
        );
        assert_eq!(mounter.unmount_count(), 3);
        assert_eq!(mgr.state(), MountState::Unmounted);

        let kinds: Vec<&str> = repo
            .calls()
            .iter()
            .map(|c| match c {
                RepoCall::Refresh { .. } => "refresh",
                RepoCall::Download { .. } => "download",
                RepoCall::Install { .. } => "install",
            })
            .collect();
        assert_eq!(kinds, ["refresh", "download", "install", "install"]);
    }

    #[test]
    fn run_without_packages_mounts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = MockUnionMount::new();
        let parts = vec![part(dir.path(), "a", &[])];
        let base = Some(dir.path().join("base"));
        let mut mgr = manager(dir.path(), base, parts, &mounter, &MockRepository::new());

        let report = OverlayStep::new(&mut mgr).run().unwrap();
        assert!(!report.skipped);
        assert!(report.downloaded.is_empty());
        assert!(report.installed.is_empty());
        assert!(mounter.calls().is_empty());
    }

    #[test]
    fn interrupt_stops_before_next_part() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = MockUnionMount::new();
        let repo = MockRepository::new();
        let parts = vec![part(dir.path(), "a", &["hello"])];
        let base = Some(dir.path().join("base"));
        let mut mgr = manager(dir.path(), base, parts, &mounter, &repo);

        let result = OverlayStep::new(&mut mgr)
            .with_interrupt_check(|| true)
            .run();
        assert!(matches!(result, Err(CoreError::Interrupted(p)) if p == "a"));
        // the cache session completed and was unmounted
        assert_eq!(mounter.stacks().len(), 1);
        assert_eq!(mounter.unmount_count(), 1);
        assert_eq!(mgr.state(), MountState::Unmounted);
    }

    #[test]
    fn install_failure_aborts_and_unmounts() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = MockUnionMount::new();
        let repo = MockRepository::new();
        let parts = vec![part(dir.path(), "a", &["hello"]), part(dir.path(), "b", &["jq"])];
        let base = Some(dir.path().join("base"));
        let mut mgr = manager(dir.path(), base, parts, &mounter, &repo);
        repo.set_fail(true);

        assert!(OverlayStep::new(&mut mgr).run().is_err());
        // refresh failed inside the cache session; nothing else was mounted
        assert_eq!(mounter.stacks().len(), 1);
        assert_eq!(mounter.unmount_count(), 1);
    }
}
