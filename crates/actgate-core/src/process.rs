use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to keep reading pipes after the direct child is gone. Background
/// grandchildren can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// ProcessSpec / ProcessOutput
// ---------------------------------------------------------------------------

/// One bounded child-process invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    /// Byte cap applied to stdout and stderr independently.
    pub output_cap: usize,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            timeout: Duration::from_secs(30),
            output_cap: 1024 * 1024,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_cap(mut self, bytes: usize) -> Self {
        self.output_cap = bytes;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` when killed by a signal or on timeout.
    pub code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    pub truncated: bool,
}

impl ProcessOutput {
    /// Human-readable transcript of the run, used as the action result.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.stdout.is_empty() {
            out.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("stderr:\n");
            out.push_str(&self.stderr);
        }
        if self.truncated {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("[output truncated]");
        }
        if out.is_empty() {
            out.push_str("(no output)");
        }
        out
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Run `spec` to completion or timeout. Only spawn and wait failures are
/// errors; non-zero exits and timeouts come back as a [`ProcessOutput`].
pub async fn run(spec: &ProcessSpec) -> std::io::Result<ProcessOutput> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    debug!(program = %spec.program, pid = ?child.id(), "process spawned");

    let stdout = child.stdout.take().map(|r| drain(r, spec.output_cap));
    let stderr = child.stderr.take().map(|r| drain(r, spec.output_cap));

    let (status, timed_out) = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(status) => (Some(status?), false),
        Err(_) => {
            warn!(program = %spec.program, timeout = ?spec.timeout, "process timed out, killing");
            child.kill().await?;
            (None, true)
        }
    };

    let (stdout, out_truncated) = collect(stdout).await;
    let (stderr, err_truncated) = collect(stderr).await;

    let code = status.and_then(|s| s.code());
    Ok(ProcessOutput {
        stdout,
        stderr,
        code,
        success: status.map(|s| s.success()).unwrap_or(false),
        timed_out,
        truncated: out_truncated || err_truncated,
    })
}

// ---------------------------------------------------------------------------
// Capped pipe readers
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

type Drain = (Arc<Mutex<Capture>>, JoinHandle<()>);

/// Read `reader` to EOF in a background task, keeping at most `cap` bytes.
/// Reading continues past the cap so the child never blocks on a full pipe.
fn drain<R>(mut reader: R, cap: usize) -> Drain
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let capture = Arc::new(Mutex::new(Capture::default()));
    let sink = Arc::clone(&capture);
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if let Ok(mut c) = sink.lock() {
                let room = cap.saturating_sub(c.bytes.len());
                if n > room {
                    c.truncated = true;
                }
                let take = n.min(room);
                c.bytes.extend_from_slice(&buf[..take]);
            }
        }
    });
    (capture, handle)
}

async fn collect(drain: Option<Drain>) -> (String, bool) {
    let Some((capture, mut handle)) = drain else {
        return (String::new(), false);
    };
    if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
        handle.abort();
    }
    capture
        .lock()
        .map(|c| (String::from_utf8_lossy(&c.bytes).into_owned(), c.truncated))
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = run(&sh("echo hello; echo oops >&2; exit 3")).await.unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.code, Some(3));
        assert!(!out.success);
        assert!(!out.timed_out);
        assert!(out.render().contains("stderr:\noops"));
    }

    #[tokio::test]
    async fn success_is_reported() {
        let out = run(&sh("true")).await.unwrap();
        assert!(out.success);
        assert_eq!(out.code, Some(0));
        assert_eq!(out.render(), "(no output)");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let spec = sh("echo started; exec sleep 10").timeout(Duration::from_millis(300));
        let started = std::time::Instant::now();
        let out = run(&spec).await.unwrap();
        assert!(out.timed_out);
        assert!(!out.success);
        assert_eq!(out.code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn output_is_capped_but_fully_drained() {
        let spec = sh("i=0; while [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done")
            .output_cap(100);
        let out = run(&spec).await.unwrap();
        assert!(out.success);
        assert!(out.truncated);
        assert_eq!(out.stdout.len(), 100);
        assert!(out.render().ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = run(&sh("pwd").cwd(dir.path())).await.unwrap();
        let reported = std::path::PathBuf::from(out.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let spec = ProcessSpec::new("definitely-not-a-real-program-xyz", vec![]);
        assert!(run(&spec).await.is_err());
    }
}
