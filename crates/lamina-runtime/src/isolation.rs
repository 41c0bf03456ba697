use crate::RuntimeError;
use std::fmt::Write as _;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// A root directory that commands can be run against as if it were `/`.
pub trait IsolatedRoot {
    /// Host path of the isolated root.
    fn root(&self) -> &Path;

    /// Run `argv` with `root()` as its filesystem root.
    fn exec(&self, argv: &[String]) -> Result<(), RuntimeError>;
}

/// Isolation primitive: enter a restricted root, run `body`, return.
pub trait Isolation: Send + Sync {
    fn name(&self) -> &str;

    fn enter(
        &self,
        root: &Path,
        body: &mut dyn FnMut(&dyn IsolatedRoot) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError>;

    /// Signal this primitive uses to tear down its own isolated processes.
    ///
    /// A process ending with this signal was stopped by the primitive, not by
    /// a failure of the command it was running.
    fn teardown_signal(&self) -> Option<i32> {
        None
    }
}

fn shell_quote(s: &str) -> String {
    // Single-quoting in POSIX shell: replace ' with '\'' then wrap in '
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn shell_quote_path(p: &Path) -> String {
    shell_quote(&p.to_string_lossy())
}

/// Runs each command in a fresh user + mount + pid namespace chrooted into the
/// root, through `unshare` and `chroot`.
///
/// The calling process never changes its own root and never forks itself, so
/// nothing escapes the command's lifetime. `unshare --fork` waits for the
/// chrooted command, which runs as PID 1 of its namespace; a signal exit can
/// only come from outside and is always reported, so this primitive has no
/// teardown signal.
#[derive(Debug, Clone, Default)]
pub struct ChrootIsolation {
    pub isolate_network: bool,
}

impl ChrootIsolation {
    pub fn new(isolate_network: bool) -> Self {
        Self { isolate_network }
    }
}

impl Isolation for ChrootIsolation {
    fn name(&self) -> &'static str {
        "chroot"
    }

    fn enter(
        &self,
        root: &Path,
        body: &mut dyn FnMut(&dyn IsolatedRoot) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        if !root.is_dir() {
            return Err(RuntimeError::ExecFailed(format!(
                "isolated root does not exist: {}",
                root.display()
            )));
        }
        let session = ChrootSession {
            root: root.to_path_buf(),
            isolate_network: self.isolate_network,
        };
        body(&session)
    }
}

struct ChrootSession {
    root: PathBuf,
    isolate_network: bool,
}

impl IsolatedRoot for ChrootSession {
    fn root(&self) -> &Path {
        &self.root
    }

    fn exec(&self, argv: &[String]) -> Result<(), RuntimeError> {
        if argv.is_empty() {
            return Ok(());
        }

        let script = build_chroot_script(&self.root, argv);
        let mut cmd = build_unshare_command(self.isolate_network);
        cmd.arg("/bin/sh").arg("-c").arg(&script);
        cmd.stdin(Stdio::null());

        debug!("running in {}: {}", self.root.display(), argv.join(" "));
        let output = cmd
            .output()
            .map_err(|e| RuntimeError::ExecFailed(format!("failed to start unshare: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{}", stdout.trim_end());
        }

        if let Some(signal) = output.status.signal() {
            return Err(RuntimeError::Terminated { signal });
        }
        if !output.status.success() {
            return Err(RuntimeError::ExecFailed(format!(
                "'{}' exited with {}:\nstdout: {stdout}\nstderr: {}",
                argv.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

fn build_unshare_command(isolate_network: bool) -> Command {
    let mut cmd = Command::new("unshare");
    cmd.args([
        "--user",
        "--map-root-user",
        "--mount",
        "--pid",
        "--fork",
        "--kill-child=SIGTERM",
    ]);

    if isolate_network {
        cmd.arg("--net");
    }

    cmd
}

fn build_chroot_script(root: &Path, argv: &[String]) -> String {
    let qr = shell_quote_path(root);
    let mut script = String::new();

    let _ = writeln!(script, "mkdir -p {qr}/proc {qr}/dev {qr}/etc 2>/dev/null");
    let _ = writeln!(script, "mount -t proc proc {qr}/proc 2>/dev/null || true");
    let _ = writeln!(script, "mount --rbind /dev {qr}/dev 2>/dev/null && mount --make-rslave {qr}/dev 2>/dev/null || true");
    // A symlinked resolv.conf would redirect the bind mount outside the root.
    let _ = writeln!(
        script,
        "if [ ! -L {qr}/etc/resolv.conf ]; then touch {qr}/etc/resolv.conf 2>/dev/null; mount --bind /etc/resolv.conf {qr}/etc/resolv.conf 2>/dev/null || true; fi"
    );
    script.push_str("export PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin; ");
    script.push_str("export DEBIAN_FRONTEND=noninteractive; ");

    let escaped: Vec<String> = argv.iter().map(|a| shell_quote(a)).collect();
    let _ = writeln!(script, "exec chroot {qr} {}", escaped.join(" "));

    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("hello"), "'hello'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn shell_quote_prevents_injection() {
        let quoted = shell_quote("$(rm -rf /)");
        assert_eq!(quoted, "'$(rm -rf /)'");
        let quoted = shell_quote("value\n; rm -rf /");
        assert!(quoted.starts_with('\'') && quoted.ends_with('\''));
    }

    #[test]
    fn chroot_script_execs_quoted_command() {
        let script = build_chroot_script(
            Path::new("/build/overlay/overlay"),
            &["apt-get".to_owned(), "install".to_owned(), "my pkg".to_owned()],
        );
        assert!(script.contains("mount -t proc"));
        assert!(script.contains("mount --bind /etc/resolv.conf '/build/overlay/overlay'/etc/resolv.conf"));
        assert!(script
            .trim_end()
            .ends_with("exec chroot '/build/overlay/overlay' 'apt-get' 'install' 'my pkg'"));
    }

    #[test]
    fn chroot_script_skips_symlinked_resolver() {
        let script = build_chroot_script(Path::new("/r"), &["true".to_owned()]);
        assert!(script.contains("if [ ! -L '/r'/etc/resolv.conf ]"));
    }

    #[test]
    fn unshare_command_adds_net_only_when_isolated() {
        let args = |cmd: &Command| -> Vec<String> {
            cmd.get_args()
                .map(|a| a.to_string_lossy().into_owned())
                .collect()
        };
        assert!(!args(&build_unshare_command(false)).contains(&"--net".to_owned()));
        assert!(args(&build_unshare_command(true)).contains(&"--net".to_owned()));
        assert!(args(&build_unshare_command(false)).contains(&"--kill-child=SIGTERM".to_owned()));
    }

    #[test]
    fn enter_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let iso = ChrootIsolation::new(false);
        let result = iso.enter(&dir.path().join("missing"), &mut |_| Ok(()));
        assert!(matches!(result, Err(RuntimeError::ExecFailed(_))));
    }

    #[test]
    fn enter_runs_body_with_root() {
        let dir = tempfile::tempdir().unwrap();
        let iso = ChrootIsolation::new(false);
        let mut seen = None;
        iso.enter(dir.path(), &mut |r| {
            seen = Some(r.root().to_path_buf());
            // empty argv never spawns anything
            r.exec(&[])
        })
        .unwrap();
        assert_eq!(seen.as_deref(), Some(dir.path()));
    }

    #[test]
    fn chroot_has_no_teardown_signal() {
        assert_eq!(ChrootIsolation::new(false).teardown_signal(), None);
        assert_eq!(ChrootIsolation::new(true).teardown_signal(), None);
    }
}
