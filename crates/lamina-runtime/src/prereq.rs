use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, Copy)]
enum Probe {
    /// At least one of these executables is on `PATH`.
    AnyCommand(&'static [&'static str]),
    /// An unprivileged `unshare` can create a user namespace.
    UserNamespaces,
}

/// A host capability the fuse backend depends on.
#[derive(Debug)]
pub struct Requirement {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
    /// Only probed once the named earlier requirement is satisfied.
    pub after: Option<&'static str>,
    probe: Probe,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, needed for {}; {}", self.name, self.purpose, self.install_hint)
    }
}

/// Everything `--backend fuse` needs from the host, in probe order.
pub const FUSE_BACKEND: &[Requirement] = &[
    Requirement {
        name: "unshare",
        purpose: "isolating package managers",
        install_hint: "ships with util-linux",
        after: None,
        probe: Probe::AnyCommand(&["unshare"]),
    },
    Requirement {
        name: "user namespaces",
        purpose: "running chroot without root",
        install_hint: "enable CONFIG_USER_NS or sysctl kernel.unprivileged_userns_clone=1",
        after: Some("unshare"),
        probe: Probe::UserNamespaces,
    },
    Requirement {
        name: "chroot",
        purpose: "entering the merged layer stack",
        install_hint: "ships with coreutils",
        after: None,
        probe: Probe::AnyCommand(&["chroot"]),
    },
    Requirement {
        name: "fuse-overlayfs",
        purpose: "mounting part layer stacks",
        install_hint: "install the fuse-overlayfs package",
        after: None,
        probe: Probe::AnyCommand(&["fuse-overlayfs"]),
    },
    Requirement {
        name: "fusermount",
        purpose: "unmounting part layer stacks",
        install_hint: "install fuse3 (fusermount3) or fuse (fusermount)",
        after: None,
        probe: Probe::AnyCommand(&["fusermount3", "fusermount"]),
    },
];

/// Answers the questions a [`Requirement`] asks of the host.
pub trait HostProbe {
    fn has_command(&self, name: &str) -> bool;
    fn user_namespaces_work(&self) -> bool;
}

/// Probes the machine this process runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveHost;

impl HostProbe for LiveHost {
    fn has_command(&self, name: &str) -> bool {
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| is_executable(&dir.join(name)))
    }

    fn user_namespaces_work(&self) -> bool {
        Command::new("unshare")
            .args(["--user", "--map-root-user", "--fork", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// Requirements from `table` the host does not meet. A requirement whose
/// `after` dependency is missing is not probed or reported.
pub fn unmet<'t>(table: &'t [Requirement], host: &dyn HostProbe) -> Vec<&'t Requirement> {
    let mut missing: Vec<&Requirement> = Vec::new();
    for req in table {
        if req
            .after
            .is_some_and(|dep| missing.iter().any(|m| m.name == dep))
        {
            continue;
        }
        let met = match req.probe {
            Probe::AnyCommand(names) => names.iter().any(|n| host.has_command(n)),
            Probe::UserNamespaces => host.user_namespaces_work(),
        };
        if !met {
            missing.push(req);
        }
    }
    missing
}

/// Unmet fuse backend requirements on this host.
pub fn check_overlay_prereqs() -> Vec<&'static Requirement> {
    unmet(FUSE_BACKEND, &LiveHost)
}

pub fn format_missing(missing: &[&Requirement]) -> String {
    let lines: Vec<String> = missing.iter().map(|r| format!("  - {r}")).collect();
    format!(
        "missing prerequisites:\n{}\nLamina needs these to mount layer stacks and run package managers in them.",
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeHost {
        commands: &'static [&'static str],
        userns: bool,
        userns_probed: Cell<bool>,
    }

    impl FakeHost {
        fn new(commands: &'static [&'static str], userns: bool) -> Self {
            Self {
                commands,
                userns,
                userns_probed: Cell::new(false),
            }
        }
    }

    impl HostProbe for FakeHost {
        fn has_command(&self, name: &str) -> bool {
            self.commands.contains(&name)
        }

        fn user_namespaces_work(&self) -> bool {
            self.userns_probed.set(true);
            self.userns
        }
    }

    fn names(missing: &[&Requirement]) -> Vec<&'static str> {
        missing.iter().map(|r| r.name).collect()
    }

    #[test]
    fn complete_host_meets_everything() {
        let host = FakeHost::new(&["unshare", "chroot", "fuse-overlayfs", "fusermount3"], true);
        assert!(unmet(FUSE_BACKEND, &host).is_empty());
    }

    #[test]
    fn either_fusermount_will_do() {
        let host = FakeHost::new(&["unshare", "chroot", "fuse-overlayfs", "fusermount"], true);
        assert!(unmet(FUSE_BACKEND, &host).is_empty());

        let host = FakeHost::new(&["unshare", "chroot", "fuse-overlayfs"], true);
        assert_eq!(names(&unmet(FUSE_BACKEND, &host)), ["fusermount"]);
    }

    #[test]
    fn missing_unshare_skips_namespace_probe() {
        let host = FakeHost::new(&["chroot"], false);
        let missing = unmet(FUSE_BACKEND, &host);
        assert_eq!(names(&missing), ["unshare", "fuse-overlayfs", "fusermount"]);
        assert!(!host.userns_probed.get());
    }

    #[test]
    fn broken_user_namespaces_are_reported() {
        let host = FakeHost::new(&["unshare", "chroot", "fuse-overlayfs", "fusermount3"], false);
        assert_eq!(names(&unmet(FUSE_BACKEND, &host)), ["user namespaces"]);
        assert!(host.userns_probed.get());
    }

    #[test]
    fn dependencies_point_backwards() {
        for (i, req) in FUSE_BACKEND.iter().enumerate() {
            if let Some(dep) = req.after {
                assert!(FUSE_BACKEND[..i].iter().any(|r| r.name == dep), "{}", req.name);
            }
        }
    }

    #[test]
    fn format_lists_each_unmet_requirement() {
        let host = FakeHost::new(&["unshare", "chroot"], true);
        let output = format_missing(&unmet(FUSE_BACKEND, &host));
        assert!(output.starts_with("missing prerequisites:\n"));
        assert!(output.contains("  - fuse-overlayfs, needed for mounting part layer stacks;"));
        assert!(output.contains("  - fusermount, needed for unmounting"));
        assert!(!output.contains("chroot,"));
    }

    #[test]
    fn only_executable_files_count() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::write(&plain, "").unwrap();
        assert!(!is_executable(&plain));

        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&plain));
        assert!(!is_executable(dir.path()));
    }
}
