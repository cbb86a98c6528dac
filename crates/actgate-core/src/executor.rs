//! Performs approved actions.
//!
//! Every operation returns `Result<String, ExecError>`: the `Ok` text becomes
//! the action result, and the error is split into policy refusals (the action
//! never ran) and execution failures (it ran, or tried to, and may be retried).

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::backup::BackupStore;
use crate::config::{Config, LimitsConfig};
use crate::error::ActgateError;
use crate::io;
use crate::process::{self, ProcessSpec};
use crate::safety::{Denial, SafetyGate};
use crate::types::{ActionDescriptor, ActionKind, TargetOs};

// ---------------------------------------------------------------------------
// ExecError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Access::Read => "read",
            Access::Write => "write",
        })
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("access denied: '{path}' is not under an allowed {access} prefix")]
    AccessDenied { path: String, access: Access },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Blocked(Denial),

    #[error("interpreter not available: {0}")]
    InterpreterMissing(String),

    #[error("timed out after {secs}s\n{output}")]
    Timeout { secs: u64, output: String },

    #[error("{status}\n{output}")]
    NonZeroExit { status: String, output: String },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] ActgateError),
}

impl ExecError {
    /// Policy and precondition refusals: nothing was executed.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            ExecError::AccessDenied { .. } | ExecError::NotFound(_) | ExecError::Blocked(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Script composition
// ---------------------------------------------------------------------------

/// A script run expressed as one shell command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    /// Interpreter binary that must be on PATH.
    pub interpreter: &'static str,
    /// Full command line: interpreter, script path and appended arguments.
    pub command: String,
}

/// Pick the interpreter by extension and target OS and compose the command
/// line the gate re-checks and the shell runs.
pub fn compose_script(os: TargetOs, script: &str, args: Option<&str>) -> ScriptInvocation {
    let ext = Path::new(script)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let quoted = quote(os, script);

    let (interpreter, mut command) = match ext.as_str() {
        "ps1" if os.is_windows() => (
            "powershell",
            format!("powershell -NoProfile -ExecutionPolicy Bypass -File {quoted}"),
        ),
        "ps1" => ("pwsh", format!("pwsh -NoProfile -File {quoted}")),
        "bat" | "cmd" => ("cmd", format!("cmd /C {quoted}")),
        _ if os.is_windows() => ("bash", format!("bash {quoted}")),
        _ => ("sh", format!("sh {quoted}")),
    };
    if let Some(args) = args.map(str::trim).filter(|a| !a.is_empty()) {
        command.push(' ');
        command.push_str(args);
    }
    ScriptInvocation {
        interpreter,
        command,
    }
}

fn quote(os: TargetOs, s: &str) -> String {
    if os.is_windows() {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// The shell starts in the script's directory, so a relative path is
/// anchored to the current directory first.
fn resolve_script(path: &str) -> std::io::Result<PathBuf> {
    let script = PathBuf::from(path);
    if script.is_absolute() {
        return Ok(script);
    }
    Ok(std::env::current_dir()?.join(script))
}

/// `(program, flag)` of the OS command shell.
fn shell(os: TargetOs) -> (&'static str, &'static str) {
    if os.is_windows() {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Executor {
    gate: SafetyGate,
    backups: BackupStore,
    limits: LimitsConfig,
    os: TargetOs,
}

impl Executor {
    pub fn new(gate: SafetyGate, backups: BackupStore, limits: LimitsConfig, os: TargetOs) -> Self {
        Self {
            gate,
            backups,
            limits,
            os,
        }
    }

    pub fn from_config(cfg: &Config, gate: SafetyGate) -> crate::Result<Self> {
        let backups = BackupStore::new(cfg.backup_dir()?);
        Ok(Self::new(gate, backups, cfg.limits.clone(), cfg.os))
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub async fn execute(&self, action: &ActionDescriptor) -> Result<String, ExecError> {
        info!(kind = %action.kind, target = %action.target, "executing action");
        match action.kind {
            ActionKind::ReadFile => self.read_file(&action.target).await,
            ActionKind::RunCmd => self.run_command(&action.target).await,
            ActionKind::RunScript => {
                self.run_script(&action.target, action.content.as_deref())
                    .await
            }
            ActionKind::WriteFile => {
                self.write_file(&action.target, action.content.as_deref().unwrap_or(""))
                    .await
            }
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<String, ExecError> {
        if !self.gate.is_path_readable(path) {
            return Err(ExecError::AccessDenied {
                path: path.to_string(),
                access: Access::Read,
            });
        }
        let target = PathBuf::from(path);
        let display = path.to_string();
        blocking(move || match std::fs::read(&target) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExecError::NotFound(display)),
            Err(e) => Err(ExecError::Io(e)),
        })
        .await
    }

    pub async fn run_command(&self, command: &str) -> Result<String, ExecError> {
        self.gate.check_command(command).map_err(|denial| {
            warn!(rule = %denial.rule_id, "command blocked");
            ExecError::Blocked(denial)
        })?;
        let (program, flag) = shell(self.os);
        let spec = ProcessSpec::new(program, vec![flag.to_string(), command.to_string()])
            .timeout(self.limits.command_timeout())
            .output_cap(self.limits.command_output_bytes);
        self.run_process(spec, self.limits.command_timeout_secs)
            .await
    }

    pub async fn run_script(&self, path: &str, args: Option<&str>) -> Result<String, ExecError> {
        let script = resolve_script(path)?;
        if !tokio::fs::try_exists(&script).await.unwrap_or(false) {
            return Err(ExecError::NotFound(path.to_string()));
        }

        let invocation = compose_script(self.os, &script.to_string_lossy(), args);
        self.gate
            .check_command(&invocation.command)
            .map_err(|denial| {
                warn!(rule = %denial.rule_id, script = %path, "script invocation blocked");
                ExecError::Blocked(denial)
            })?;
        if which::which(invocation.interpreter).is_err() {
            return Err(ExecError::InterpreterMissing(
                invocation.interpreter.to_string(),
            ));
        }

        let (program, flag) = shell(self.os);
        let mut spec = ProcessSpec::new(program, vec![flag.to_string(), invocation.command])
            .timeout(self.limits.script_timeout())
            .output_cap(self.limits.script_output_bytes);
        if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
            spec = spec.cwd(dir);
        }
        self.run_process(spec, self.limits.script_timeout_secs)
            .await
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<String, ExecError> {
        if !self.gate.is_path_writable(path) {
            return Err(ExecError::AccessDenied {
                path: path.to_string(),
                access: Access::Write,
            });
        }
        let target = PathBuf::from(path);
        let data = content.as_bytes().to_vec();
        let backups = self.backups.clone();
        let display = path.to_string();

        blocking(move || {
            let backup = backups.backup(&target)?;
            io::atomic_write(&target, &data)?;
            let msg = match backup {
                Some(record) => format!(
                    "wrote {} bytes to {display} (previous content backed up to {})",
                    data.len(),
                    record.path.display()
                ),
                None => format!("wrote {} bytes to {display} (new file, no backup)", data.len()),
            };
            Ok(msg)
        })
        .await
    }

    async fn run_process(&self, spec: ProcessSpec, timeout_secs: u64) -> Result<String, ExecError> {
        let output = process::run(&spec).await.map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let rendered = output.render();
        if output.timed_out {
            return Err(ExecError::Timeout {
                secs: timeout_secs,
                output: rendered,
            });
        }
        if !output.success {
            let status = match output.code {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            };
            return Err(ExecError::NonZeroExit {
                status,
                output: rendered,
            });
        }
        Ok(rendered)
    }
}

/// Run blocking file work off the async workers.
async fn blocking<F>(f: F) -> Result<String, ExecError>
where
    F: FnOnce() -> Result<String, ExecError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExecError::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> Executor {
        let root = dir.path().to_string_lossy().into_owned();
        let cfg = SafetyConfig {
            read_prefixes: vec![root.clone()],
            write_prefixes: vec![root],
            ..SafetyConfig::default()
        };
        let gate = SafetyGate::from_config(&cfg).unwrap();
        let limits = LimitsConfig {
            command_timeout_secs: 1,
            ..LimitsConfig::default()
        };
        Executor::new(
            gate,
            BackupStore::new(dir.path().join("backups")),
            limits,
            TargetOs::host(),
        )
    }

    fn path_str(p: &Path) -> String {
        p.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn write_over_existing_file_leaves_identical_backup() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let target = dir.path().join("notes.txt");
        std::fs::write(&target, "before: 1\n").unwrap();

        let msg = exec
            .write_file(&path_str(&target), "after: 2\n")
            .await
            .unwrap();
        assert!(msg.contains("backed up"), "{msg}");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "after: 2\n");

        let records = exec.backups().list_for(&target).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(std::fs::read(&records[0].path).unwrap(), b"before: 1\n");
    }

    #[tokio::test]
    async fn write_to_new_path_makes_no_backup() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let target = dir.path().join("sub/dir/new.txt");

        let msg = exec.write_file(&path_str(&target), "x").await.unwrap();
        assert!(msg.contains("no backup"), "{msg}");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "x");
        assert!(exec.backups().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_outside_prefix_is_denied() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let err = exec.write_file("/etc/shadow", "x").await.unwrap_err();
        assert!(matches!(
            err,
            ExecError::AccessDenied {
                access: Access::Write,
                ..
            }
        ));
        assert!(err.is_policy());
    }

    #[tokio::test]
    async fn read_existing_and_missing() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let target = dir.path().join("a.txt");
        std::fs::write(&target, "hello").unwrap();

        assert_eq!(exec.read_file(&path_str(&target)).await.unwrap(), "hello");

        let missing = dir.path().join("missing.txt");
        let err = exec.read_file(&path_str(&missing)).await.unwrap_err();
        assert!(matches!(err, ExecError::NotFound(_)));
        assert!(err.is_policy());

        let err = exec.read_file("/root/elsewhere").await.unwrap_err();
        assert!(matches!(err, ExecError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn blocked_command_never_runs() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        match exec.run_command("rm -rf /").await {
            Err(ExecError::Blocked(denial)) => assert_eq!(denial.rule_id, "rm-recursive-force"),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_success_and_failure() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        assert_eq!(exec.run_command("echo hi").await.unwrap(), "hi\n");

        let err = exec.run_command("echo nope >&2; exit 4").await.unwrap_err();
        match &err {
            ExecError::NonZeroExit { status, output } => {
                assert_eq!(status, "exited with code 4");
                assert!(output.contains("nope"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
        assert!(!err.is_policy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_timeout_is_an_execution_error() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let err = exec.run_command("sleep 5").await.unwrap_err();
        assert!(matches!(err, ExecError::Timeout { secs: 1, .. }));
        assert!(!err.is_policy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_runs_in_its_own_directory_with_args() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let script = dir.path().join("greet.sh");
        std::fs::write(&script, "echo \"hi $1\"\npwd\n").unwrap();

        let out = exec
            .run_script(&path_str(&script), Some("there"))
            .await
            .unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("hi there"));
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relative_script_path_runs_from_script_directory() {
        // Relative to the test's working directory, which is the crate root.
        let dir = tempfile::Builder::new()
            .prefix("relative-script")
            .tempdir_in(".")
            .unwrap();
        let exec = executor(&dir);
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(scripts.join("job.sh"), "echo ran\npwd\n").unwrap();

        let name = dir.path().file_name().unwrap().to_string_lossy();
        let out = exec
            .run_script(&format!("{name}/scripts/job.sh"), None)
            .await
            .unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("ran"));
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(cwd.canonicalize().unwrap(), scripts.canonicalize().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn relative_script_resolves_against_current_dir() {
        let resolved = resolve_script("scripts/job.sh").unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(
            resolved,
            std::env::current_dir().unwrap().join("scripts/job.sh")
        );
        assert_eq!(resolve_script("/opt/x.sh").unwrap(), PathBuf::from("/opt/x.sh"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_keeps_executable_bit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let target = dir.path().join("run.sh");
        std::fs::write(&target, "echo old\n").unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755)).unwrap();

        exec.write_file(&path_str(&target), "echo new\n").await.unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "echo new\n");
    }

    #[tokio::test]
    async fn script_arguments_are_rechecked() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let script = dir.path().join("ok.sh");
        std::fs::write(&script, "echo ok\n").unwrap();

        let err = exec
            .run_script(&path_str(&script), Some("; rm -rf /"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Blocked(_)));
    }

    #[tokio::test]
    async fn missing_script_is_not_found() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let err = exec
            .run_script(&path_str(&dir.path().join("nope.sh")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NotFound(_)));
    }

    #[test]
    fn interpreter_follows_extension_and_os() {
        let ps = compose_script(TargetOs::Windows, "C:\\s\\a.ps1", Some("-X 1"));
        assert_eq!(ps.interpreter, "powershell");
        assert_eq!(
            ps.command,
            "powershell -NoProfile -ExecutionPolicy Bypass -File \"C:\\s\\a.ps1\" -X 1"
        );

        let pwsh = compose_script(TargetOs::Linux, "/s/a.PS1", None);
        assert_eq!(pwsh.interpreter, "pwsh");
        assert_eq!(pwsh.command, "pwsh -NoProfile -File '/s/a.PS1'");

        let bat = compose_script(TargetOs::Windows, "C:\\s\\run.bat", None);
        assert_eq!(bat.interpreter, "cmd");
        assert_eq!(bat.command, "cmd /C \"C:\\s\\run.bat\"");

        let sh = compose_script(TargetOs::Macos, "/s/it's.sh", Some("  a b  "));
        assert_eq!(sh.interpreter, "sh");
        assert_eq!(sh.command, "sh '/s/it'\\''s.sh' a b");
    }
}
