use crate::isolation::IsolatedRoot;
use crate::RuntimeError;
use std::fmt;
use std::path::Path;
use tracing::info;

/// Directory the package managers keep transient downloads and metadata in,
/// relative to the root.
pub const TRANSIENT_CACHE_DIR: &str = "var/cache";

/// Package-repository subsystem, run against whatever root it is handed.
pub trait PackageRepository: Send + Sync {
    fn name(&self) -> &str;

    fn refresh_index(&self, root: &dyn IsolatedRoot) -> Result<(), RuntimeError>;

    fn download(&self, root: &dyn IsolatedRoot, packages: &[String]) -> Result<(), RuntimeError>;

    fn install(&self, root: &dyn IsolatedRoot, packages: &[String]) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Zypper,
    Pacman,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Zypper => "zypper",
            Self::Pacman => "pacman",
        })
    }
}

impl PackageManager {
    pub fn detect(rootfs: &Path) -> Option<Self> {
        if rootfs.join("usr/bin/apt-get").exists() || rootfs.join("usr/bin/apt").exists() {
            Some(Self::Apt)
        } else if rootfs.join("usr/bin/dnf").exists() || rootfs.join("usr/bin/dnf5").exists() {
            Some(Self::Dnf)
        } else if rootfs.join("usr/bin/zypper").exists() {
            Some(Self::Zypper)
        } else if rootfs.join("usr/bin/pacman").exists() {
            Some(Self::Pacman)
        } else {
            None
        }
    }

    pub fn refresh_command(self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::Apt => &["apt-get", "update"],
            Self::Dnf => &["dnf", "makecache", "-y"],
            Self::Zypper => &["zypper", "--non-interactive", "refresh"],
            Self::Pacman => &["pacman", "-Sy", "--noconfirm"],
        };
        args.iter().map(|s| (*s).to_owned()).collect()
    }

    pub fn download_command(self, packages: &[String]) -> Vec<String> {
        if packages.is_empty() {
            return Vec::new();
        }
        let args: &[&str] = match self {
            Self::Apt => &[
                "apt-get",
                "install",
                "-y",
                "--download-only",
                "--no-install-recommends",
            ],
            Self::Dnf => &[
                "dnf",
                "install",
                "-y",
                "--downloadonly",
                "--setopt=install_weak_deps=False",
            ],
            Self::Zypper => &[
                "zypper",
                "--non-interactive",
                "install",
                "--download-only",
                "--no-recommends",
            ],
            Self::Pacman => &["pacman", "-Sw", "--noconfirm", "--needed"],
        };
        let mut cmd: Vec<String> = args.iter().map(|s| (*s).to_owned()).collect();
        cmd.extend(packages.iter().cloned());
        cmd
    }

    pub fn install_command(self, packages: &[String]) -> Vec<String> {
        if packages.is_empty() {
            return Vec::new();
        }
        let args: &[&str] = match self {
            Self::Apt => &["apt-get", "install", "-y", "--no-install-recommends"],
            Self::Dnf => &[
                "dnf",
                "install",
                "-y",
                "--setopt=install_weak_deps=False",
            ],
            Self::Zypper => &["zypper", "--non-interactive", "install", "--no-recommends"],
            Self::Pacman => &["pacman", "-S", "--noconfirm", "--needed"],
        };
        let mut cmd: Vec<String> = args.iter().map(|s| (*s).to_owned()).collect();
        cmd.extend(packages.iter().cloned());
        cmd
    }
}

/// Drives whichever supported package manager the root ships.
#[derive(Debug, Default)]
pub struct SystemRepository;

impl SystemRepository {
    pub fn new() -> Self {
        Self
    }

    fn detect(root: &dyn IsolatedRoot) -> Result<PackageManager, RuntimeError> {
        PackageManager::detect(root.root())
            .ok_or_else(|| RuntimeError::NoPackageManager(root.root().display().to_string()))
    }
}

impl PackageRepository for SystemRepository {
    fn name(&self) -> &'static str {
        "system"
    }

    fn refresh_index(&self, root: &dyn IsolatedRoot) -> Result<(), RuntimeError> {
        let pm = Self::detect(root)?;
        info!("refreshing {pm} package index");
        root.exec(&pm.refresh_command())
    }

    fn download(&self, root: &dyn IsolatedRoot, packages: &[String]) -> Result<(), RuntimeError> {
        if packages.is_empty() {
            return Ok(());
        }
        let pm = Self::detect(root)?;
        info!("downloading {} packages via {pm}", packages.len());
        root.exec(&pm.download_command(packages))
    }

    fn install(&self, root: &dyn IsolatedRoot, packages: &[String]) -> Result<(), RuntimeError> {
        if packages.is_empty() {
            return Ok(());
        }
        let pm = Self::detect(root)?;
        info!("installing {} packages via {pm}", packages.len());
        root.exec(&pm.install_command(packages))
    }
}
