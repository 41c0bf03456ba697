use crate::layout::ProjectInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PROJECT_VERSION: u32 = 1;
const SUPPORTED_BACKENDS: &[&str] = &["fuse", "mock"];

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("failed to read project file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse project file: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported project_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("part name must not be empty")]
    EmptyPartName,
    #[error("invalid part name '{0}': only [A-Za-z0-9._-] allowed")]
    InvalidPartName(String),
    #[error("duplicate part name '{0}'")]
    DuplicatePart(String),
    #[error("unknown runtime backend '{0}', expected one of: fuse, mock")]
    UnknownBackend(String),
    #[error("project file has no parent directory: {0}")]
    NoProjectDir(String),
}

/// On-disk project file, version 1.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectFileV1 {
    pub project_version: u32,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub base_layer: Option<PathBuf>,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub parts: Vec<PartSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartSection {
    pub name: String,
    #[serde(default)]
    pub overlay_packages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub network_isolation: bool,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            network_isolation: false,
        }
    }
}

fn default_backend() -> String {
    "fuse".to_owned()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("build")
}

/// A build unit in the overlay stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Part {
    pub name: String,
    /// Upper directory of this part's overlay mount.
    pub layer_dir: PathBuf,
    pub overlay_packages: Vec<String>,
}

/// A validated project with every path resolved against the project directory.
#[derive(Debug, Clone)]
pub struct Project {
    pub info: ProjectInfo,
    pub base_layer: Option<PathBuf>,
    pub runtime: RuntimeSection,
    pub parts: Vec<Part>,
}

impl Project {
    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    pub fn all_overlay_packages(&self) -> Vec<String> {
        overlay_packages_of(&self.parts)
    }
}

/// Every overlay package requested by any of `parts`, deduplicated, in first-seen order.
pub fn overlay_packages_of(parts: &[Part]) -> Vec<String> {
    let mut seen: BTreeSet<&String> = BTreeSet::new();
    parts
        .iter()
        .flat_map(|p| p.overlay_packages.iter())
        .filter(|name| seen.insert(*name))
        .cloned()
        .collect()
}

impl ProjectFileV1 {
    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.project_version != PROJECT_VERSION {
            return Err(ProjectError::UnsupportedVersion(self.project_version));
        }
        if !SUPPORTED_BACKENDS.contains(&self.runtime.backend.as_str()) {
            return Err(ProjectError::UnknownBackend(self.runtime.backend.clone()));
        }

        let mut names = BTreeSet::new();
        for part in &self.parts {
            validate_part_name(&part.name)?;
            if !names.insert(part.name.as_str()) {
                return Err(ProjectError::DuplicatePart(part.name.clone()));
            }
        }
        Ok(())
    }

    /// Validate and resolve relative paths against `project_dir`.
    pub fn resolve(self, project_dir: &Path) -> Result<Project, ProjectError> {
        self.validate()?;

        let work_dir = absolutize(project_dir, &self.work_dir);
        let info = ProjectInfo::new(work_dir);
        let base_layer = self.base_layer.map(|p| absolutize(project_dir, &p));
        let parts = self
            .parts
            .into_iter()
            .map(|section| Part {
                layer_dir: info.part_layer_dir(&section.name),
                name: section.name,
                overlay_packages: section.overlay_packages,
            })
            .collect();

        Ok(Project {
            info,
            base_layer,
            runtime: self.runtime,
            parts,
        })
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn validate_part_name(name: &str) -> Result<(), ProjectError> {
    if name.is_empty() {
        return Err(ProjectError::EmptyPartName);
    }
    if name == "." || name == ".." {
        return Err(ProjectError::InvalidPartName(name.to_owned()));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    {
        return Err(ProjectError::InvalidPartName(name.to_owned()));
    }
    Ok(())
}

pub fn parse_project_str(input: &str) -> Result<ProjectFileV1, ProjectError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_project_file(path: impl AsRef<Path>) -> Result<ProjectFileV1, ProjectError> {
    let content = fs::read_to_string(path)?;
    parse_project_str(&content)
}

/// Parse, validate and resolve a project file in one step.
pub fn load_project(path: impl AsRef<Path>) -> Result<Project, ProjectError> {
    let path = path.as_ref();
    let file = parse_project_file(path)?;
    let dir = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => std::env::current_dir()?,
        Some(p) => p.to_path_buf(),
        None => return Err(ProjectError::NoProjectDir(path.display().to_string())),
    };
    file.resolve(&dir)
}
