//! Project file parsing and work-directory layout for Lamina.
//!
//! This crate defines the schema layer: the TOML project file (`ProjectFileV1`),
//! the validated and path-resolved `Project` with its ordered `Part`s, and
//! `ProjectInfo`, which derives every overlay directory from the work directory.

pub mod layout;
pub mod project;

pub use layout::ProjectInfo;
pub use project::{
    load_project, overlay_packages_of, parse_project_file, parse_project_str, validate_part_name,
    Part, PartSection, Project, ProjectError, ProjectFileV1, RuntimeSection, PROJECT_VERSION,
};
