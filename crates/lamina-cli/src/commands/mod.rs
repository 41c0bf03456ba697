pub mod build;
pub mod completions;
pub mod doctor;
pub mod fetch;
pub mod install;
pub mod plan;

use indicatif::{ProgressBar, ProgressStyle};
use lamina_core::{LayerManager, WorkLock};
use lamina_runtime::{check_overlay_prereqs, format_missing, select_backend, Backend};
use lamina_schema::{load_project, Project};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_PROJECT_ERROR: u8 = 2;
pub const EXIT_STATE_ERROR: u8 = 3;

/// Global options every command sees.
#[derive(Debug)]
pub struct Context {
    pub project_path: PathBuf,
    pub backend: Option<String>,
    pub json: bool,
}

/// A loaded project with its layer manager, holding the work lock.
pub struct Workspace {
    pub project: Project,
    pub manager: LayerManager,
    _lock: WorkLock,
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish_spinner(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish_spinner(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish_spinner(pb, format!("✗ {msg}"));
}

/// Spinner for human output, nothing for `--json`.
pub fn maybe_spinner(ctx: &Context, msg: &str) -> Option<ProgressBar> {
    if ctx.json {
        None
    } else {
        Some(spinner(msg))
    }
}

/// Close a spinner according to `result` and pass the result through.
pub fn settle<T, E>(
    pb: Option<ProgressBar>,
    result: Result<T, E>,
    ok_msg: &str,
    fail_msg: &str,
) -> Result<T, E> {
    if let Some(pb) = pb {
        match &result {
            Ok(_) => spin_ok(&pb, ok_msg),
            Err(_) => spin_fail(&pb, fail_msg),
        }
    }
    result
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "mounted" => Style::new().cyan().bold().apply_to(state).to_string(),
        "unmounted" => Style::new().dim().apply_to(state).to_string(),
        "skipped" => Style::new().yellow().apply_to(state).to_string(),
        "installed" | "downloaded" => Style::new().green().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

pub fn load(ctx: &Context) -> Result<Project, String> {
    load_project(&ctx.project_path).map_err(|e| format!("project error: {e}"))
}

/// Backend named by `--backend`, or by the project file.
pub fn backend_for(ctx: &Context, project: &Project) -> Result<Backend, String> {
    let name = ctx
        .backend
        .as_deref()
        .unwrap_or(project.runtime.backend.as_str());
    select_backend(name, project.runtime.network_isolation).map_err(|e| e.to_string())
}

fn prereqs_skipped() -> bool {
    std::env::var("LAMINA_SKIP_PREREQS").as_deref() == Ok("1")
}

/// Load the project, pick the backend, check host tools, and take the work
/// lock. Used by every command that mounts.
pub fn open_workspace(ctx: &Context) -> Result<Workspace, String> {
    let project = load(ctx)?;
    let backend = backend_for(ctx, &project)?;
    debug!(
        "project {} with {} part(s), backend {}",
        ctx.project_path.display(),
        project.parts.len(),
        backend.name
    );

    if backend.needs_host_tools() && !prereqs_skipped() {
        let missing = check_overlay_prereqs();
        if !missing.is_empty() {
            return Err(format_missing(&missing));
        }
    }

    let lock =
        WorkLock::acquire(&project.info.lock_file()).map_err(|e| format!("work lock: {e}"))?;
    let manager = LayerManager::from_project(&project, backend);
    Ok(Workspace {
        project,
        manager,
        _lock: lock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_core::LockState;

    fn write_project(dir: &std::path::Path, backend: &str) -> PathBuf {
        let path = dir.join("lamina.toml");
        std::fs::write(
            &path,
            format!(
                r#"project_version = 1
base_layer = "base"

[runtime]
backend = "{backend}"

[[parts]]
name = "a"
"#
            ),
        )
        .unwrap();
        path
    }

    fn ctx(project_path: PathBuf, backend: Option<&str>) -> Context {
        Context {
            project_path,
            backend: backend.map(str::to_owned),
            json: true,
        }
    }

    #[test]
    fn json_pretty_serializes_string() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_state_known_and_unknown() {
        assert!(colorize_state("mounted").contains("mounted"));
        assert!(colorize_state("installed").contains("installed"));
        assert_eq!(colorize_state("other"), "other");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_PROJECT_ERROR);
        assert_ne!(EXIT_PROJECT_ERROR, EXIT_STATE_ERROR);
    }

    #[test]
    fn load_missing_project_is_project_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&ctx(dir.path().join("lamina.toml"), None)).unwrap_err();
        assert!(err.starts_with("project error:"), "{err}");
    }

    #[test]
    fn backend_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), "fuse");
        let project = load(&ctx(path.clone(), None)).unwrap();
        assert_eq!(backend_for(&ctx(path.clone(), None), &project).unwrap().name, "fuse");
        assert_eq!(
            backend_for(&ctx(path, Some("mock")), &project).unwrap().name,
            "mock"
        );
    }

    #[test]
    fn open_workspace_with_mock_takes_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_project(dir.path(), "mock");
        let ws = open_workspace(&ctx(path, None)).unwrap();
        let lock_file = ws.project.info.lock_file();
        assert!(lock_file.exists());
        assert_eq!(
            WorkLock::inspect(&lock_file).unwrap(),
            LockState::Held {
                pid: Some(std::process::id())
            }
        );
        drop(ws);
        assert_eq!(WorkLock::inspect(&lock_file).unwrap(), LockState::Free);
    }

    #[test]
    fn settle_passes_result_through() {
        let ok: Result<u8, String> = settle(None, Ok(1), "ok", "fail");
        assert_eq!(ok.unwrap(), 1);
        let pb = spinner("testing...");
        let err: Result<u8, String> = settle(Some(pb), Err("x".to_owned()), "ok", "fail");
        assert!(err.is_err());
    }
}
