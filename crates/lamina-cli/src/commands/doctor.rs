use super::{backend_for, load, Context, EXIT_FAILURE, EXIT_SUCCESS};
use lamina_core::{LockState, WorkLock};
use lamina_runtime::overlay::is_mounted;
use lamina_schema::Project;
use std::path::Path;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(&mut checks, &mut all_pass);

    match load(ctx) {
        Ok(project) => {
            checks.push(Check::pass(
                "project",
                &format!("Project file valid ({} parts)", project.parts.len()),
            ));
            check_backend(ctx, &project, &mut checks, &mut all_pass);
            check_base_layer(&project, &mut checks, &mut all_pass);
            check_overlay_state(&project, &mut checks, &mut all_pass);
            check_disk_space(project.info.work_dir(), &mut checks);
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("project", &e));
        }
    }

    print_results(&checks, all_pass, ctx.json)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = lamina_runtime::check_overlay_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass(
            "runtime_prereqs",
            "Overlay prerequisites satisfied",
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "runtime_prereqs",
            &format!(
                "Missing prerequisites: {}",
                lamina_runtime::format_missing(&missing)
            ),
        ));
    }
}

fn check_backend(ctx: &Context, project: &Project, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match backend_for(ctx, project) {
        Ok(backend) => checks.push(Check::info(
            "backend",
            &format!("Runtime backend: {}", backend.name),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("backend", &e));
        }
    }
}

fn check_base_layer(project: &Project, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match &project.base_layer {
        None => checks.push(Check::info(
            "base_layer",
            "No base layer configured (overlays disabled)",
        )),
        Some(base) if base.is_dir() => checks.push(Check::pass(
            "base_layer",
            &format!("Base layer present: {}", base.display()),
        )),
        Some(base) => {
            *all_pass = false;
            checks.push(Check::fail(
                "base_layer",
                &format!("Base layer is not a directory: {}", base.display()),
            ));
        }
    }
}

fn check_overlay_state(project: &Project, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let mount_dir = project.info.overlay_mount_dir();
    if is_mounted(&mount_dir) {
        checks.push(Check::warn(
            "overlay_mount",
            &format!(
                "Overlay still mounted at {} (a previous run may have been killed)",
                mount_dir.display()
            ),
        ));
    } else {
        checks.push(Check::pass("overlay_mount", "No stale overlay mount"));
    }

    if !project.info.work_dir().exists() {
        checks.push(Check::info(
            "work_lock",
            "Work directory not created yet (will be created on first run)",
        ));
        return;
    }
    match WorkLock::inspect(&project.info.lock_file()) {
        Ok(LockState::Free) => checks.push(Check::pass("work_lock", "Work lock is free")),
        Ok(LockState::Held { pid: Some(pid) }) => checks.push(Check::warn(
            "work_lock",
            &format!("Work lock is held by running process {pid}"),
        )),
        Ok(LockState::Held { pid: None }) => checks.push(Check::warn(
            "work_lock",
            "Work lock is held by another process",
        )),
        Ok(LockState::Stale { pid }) => checks.push(Check::warn(
            "work_lock",
            &format!(
                "Work lock left behind by process {pid}, which exited without releasing it \
                 (its overlay may still be mounted)"
            ),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "work_lock",
                &format!("Cannot check work lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Lamina Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

fn check_disk_space(work_dir: &Path, checks: &mut Vec<Check>) {
    // statvfs needs an existing path; fall back to the nearest existing parent.
    let Some(existing) = work_dir.ancestors().find(|p| p.exists()) else {
        return;
    };
    let Ok(c_path) = std::ffi::CString::new(existing.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: statvfs with a valid, NUL-terminated path and a properly
    // zeroed output struct is well-defined. The struct is only read after
    // the call succeeds.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return;
    }

    let avail_mb = stat.f_bavail * stat.f_frsize / (1024 * 1024);

    if avail_mb < 512 {
        checks.push(Check::warn(
            "disk_space",
            &format!("Low disk space for layers: {avail_mb} MB available"),
        ));
    } else {
        checks.push(Check::pass(
            "disk_space",
            &format!("Disk space: {} GB available", avail_mb / 1024),
        ));
    }
}
