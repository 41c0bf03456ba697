//! Layer stack composition and mount-state behaviour, driven through a real
//! project file and the mock backend.

use lamina_core::{
    compose_lower_dirs, CoreError, LayerManager, LayerMount, MountState, PackageCacheMount,
};
use lamina_runtime::mock::{MockIsolation, MockRepository, MockUnionMount};
use lamina_runtime::Backend;
use lamina_schema::load_project;
use std::fs;
use std::path::{Path, PathBuf};

fn write_project(dir: &Path, base_layer: bool) -> PathBuf {
    let base = if base_layer {
        format!("base_layer = \"{}\"\n", dir.join("BASE").display())
    } else {
        String::new()
    };
    let content = format!(
        r#"
project_version = 1
work_dir = "build"
{base}
[runtime]
backend = "mock"

[[parts]]
name = "a"
overlay_packages = ["hello"]

[[parts]]
name = "b"

[[parts]]
name = "c"
overlay_packages = ["jq"]
"#
    );
    let path = dir.join("lamina.toml");
    fs::write(&path, content).unwrap();
    path
}

fn setup(base_layer: bool) -> (tempfile::TempDir, LayerManager, MockUnionMount) {
    let dir = tempfile::tempdir().unwrap();
    let project = load_project(write_project(dir.path(), base_layer)).unwrap();
    let mounter = MockUnionMount::new();
    let backend = Backend::from_mocks(mounter.clone(), MockIsolation::new(), MockRepository::new());
    let manager = LayerManager::from_project(&project, backend);
    (dir, manager, mounter)
}

fn layer(dir: &Path, part: &str) -> PathBuf {
    dir.join("build/parts").join(part).join("layer")
}

#[test]
fn last_part_stacks_on_every_earlier_layer() {
    let (dir, mut mgr, mounter) = setup(true);
    mgr.mount_layer("c", false).unwrap();

    let stacks = mounter.stacks();
    assert_eq!(
        stacks[0].lower_dirs,
        [layer(dir.path(), "b"), layer(dir.path(), "a"), dir.path().join("BASE")]
    );
    assert_eq!(stacks[0].upper_dir, layer(dir.path(), "c"));
    mgr.unmount().unwrap();
}

#[test]
fn package_cache_sits_between_base_and_parts() {
    let (dir, mut mgr, mounter) = setup(true);
    mgr.mount_layer("b", true).unwrap();

    let stacks = mounter.stacks();
    assert_eq!(
        stacks[0].lower_dirs,
        [
            layer(dir.path(), "a"),
            dir.path().join("build/overlay/packages"),
            dir.path().join("BASE"),
        ]
    );
    assert_eq!(stacks[0].upper_dir, layer(dir.path(), "b"));
    assert_eq!(stacks[0].work_dir, dir.path().join("build/overlay/work"));
    mgr.unmount().unwrap();
}

#[test]
fn every_index_matches_reversed_bottom_up_order() {
    let (dir, mut mgr, mounter) = setup(true);
    let base = dir.path().join("BASE");
    let cache = dir.path().join("build/overlay/packages");
    let uppers: Vec<PathBuf> = ["a", "b", "c"].iter().map(|p| layer(dir.path(), p)).collect();

    for pkg_cache in [false, true] {
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            mgr.mount_layer(name, pkg_cache).unwrap();
            let stack = mgr.active_stack().unwrap().clone();

            let mut expected = vec![base.clone()];
            if pkg_cache {
                expected.push(cache.clone());
            }
            expected.extend(uppers[..i].iter().cloned());
            expected.reverse();

            assert_eq!(stack.lower_dirs, expected);
            assert_eq!(stack.upper_dir, uppers[i]);
            assert_eq!(
                stack.lower_dirs,
                compose_lower_dirs(&base, pkg_cache.then_some(cache.as_path()), &uppers[..i])
            );
            mgr.unmount().unwrap();
        }
    }
    assert_eq!(mounter.stacks().len(), 6);
    assert_eq!(mounter.unmount_count(), 6);
}

#[test]
fn project_without_base_layer_cannot_mount() {
    let (_dir, mut mgr, mounter) = setup(false);
    assert!(matches!(mgr.mount_layer("a", false), Err(CoreError::IllegalState(_))));
    assert!(matches!(mgr.mount_package_cache(), Err(CoreError::IllegalState(_))));
    assert!(matches!(
        LayerMount::new(&mut mgr, "a", true),
        Err(CoreError::IllegalState(_))
    ));
    assert!(matches!(
        PackageCacheMount::new(&mut mgr),
        Err(CoreError::IllegalState(_))
    ));
    assert!(mounter.calls().is_empty());
}

#[test]
fn unmount_is_valid_exactly_once_per_mount() {
    let (_dir, mut mgr, _mounter) = setup(true);
    assert!(matches!(mgr.unmount(), Err(CoreError::IllegalState(_))));
    mgr.mount_package_cache().unwrap();
    assert_eq!(mgr.state(), MountState::Mounted);
    mgr.unmount().unwrap();
    assert_eq!(mgr.state(), MountState::Unmounted);
    assert!(matches!(mgr.unmount(), Err(CoreError::IllegalState(_))));
}

#[test]
fn package_operations_need_an_active_mount() {
    let (_dir, mgr, _mounter) = setup(true);
    let pkgs = vec!["hello".to_owned()];
    assert!(matches!(mgr.refresh_package_index(), Err(CoreError::IllegalState(_))));
    assert!(matches!(mgr.download_packages(&pkgs), Err(CoreError::IllegalState(_))));
    assert!(matches!(mgr.install_packages(&pkgs), Err(CoreError::IllegalState(_))));
}

#[test]
fn sessions_pair_every_mount_with_one_unmount() {
    let (dir, mut mgr, mounter) = setup(true);

    PackageCacheMount::scope(&mut mgr, |cache| {
        cache.refresh_package_index()?;
        cache.download_packages(&["hello".to_owned(), "jq".to_owned()])
    })
    .unwrap();
    for part in ["a", "c"] {
        LayerMount::scope(&mut mgr, part, true, |mount| {
            mount.install_packages(&["hello".to_owned()])
        })
        .unwrap();
    }

    assert_eq!(mounter.stacks().len(), 3);
    assert_eq!(mounter.unmount_count(), 3);
    assert!(mounter.mounted().is_none());
    // the download landed in the mount's transient cache; install purged it
    let mount_dir = dir.path().join("build/overlay/overlay");
    assert!(!mount_dir.join("var/cache").exists());
}
