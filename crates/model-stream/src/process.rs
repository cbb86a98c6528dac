use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream::{TokenSource, TokenStream};
use crate::types::ChatMessage;
use crate::{ModelError, Result};

const READ_CHUNK: usize = 4 * 1024;

/// How long to wait for the stderr reader after the command exits.
const STDERR_GRACE: Duration = Duration::from_millis(500);

// ─── CommandSource ────────────────────────────────────────────────────────

/// Runs a local command per generation.
///
/// The conversation is written to stdin as one JSON object
/// (`{"messages":[{"role":..,"content":..},..]}`) and stdin is closed.
/// Whatever the command prints on stdout is streamed back as-is. Stderr is
/// captured in a background task and surfaced if the command exits non-zero.
#[derive(Debug, Clone)]
pub struct CommandSource {
    argv: Vec<String>,
}

impl CommandSource {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(ModelError::Process("empty command".into()));
        }
        Ok(Self { argv })
    }
}

impl TokenSource for CommandSource {
    fn stream(&self, messages: Vec<ChatMessage>) -> TokenStream {
        let (tx, stream) = TokenStream::channel();
        let argv = self.argv.clone();
        tokio::spawn(async move {
            if let Err(e) = pump(argv, messages, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        stream
    }

    fn name(&self) -> &str {
        &self.argv[0]
    }
}

async fn pump(
    argv: Vec<String>,
    messages: Vec<ChatMessage>,
    tx: &mpsc::Sender<Result<String>>,
) -> Result<()> {
    let mut child = spawn(&argv)?;
    debug!(program = %argv[0], pid = ?child.id(), "model command spawned");

    if let Some(mut stdin) = child.stdin.take() {
        let mut payload = serde_json::to_vec(&serde_json::json!({ "messages": messages }))
            .map_err(|e| ModelError::Process(format!("failed to serialize conversation: {e}")))?;
        payload.push(b'\n');
        // A command that ignores stdin may close it early; that is not an error.
        if let Err(e) = stdin.write_all(&payload).await {
            debug!(error = %e, "model command closed stdin early");
        }
    }

    let stderr_buf = Arc::new(Mutex::new(String::new()));
    let stderr_task = child.stderr.take().map(|stderr| {
        let buf = Arc::clone(&stderr_buf);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Ok(mut b) = buf.lock() {
                    if !b.is_empty() {
                        b.push('\n');
                    }
                    b.push_str(&line);
                }
            }
        })
    });

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ModelError::Process("stdout not captured".into()))?;
    let mut decoder = Utf8Decoder::default();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            read = stdout.read(&mut buf) => read?,
            // Receiver dropped while the command is silent.
            _ = tx.closed() => {
                debug!(pid = ?child.id(), "generation cancelled, killing model command");
                let _ = child.kill().await;
                return Ok(());
            }
        };
        if n == 0 {
            break;
        }
        let text = decoder.push(&buf[..n]);
        if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
            // Receiver dropped: the generation was cancelled.
            let _ = child.kill().await;
            return Ok(());
        }
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = tx.send(Ok(tail)).await;
    }

    let status = child.wait().await?;
    if let Some(task) = stderr_task {
        let _ = tokio::time::timeout(STDERR_GRACE, task).await;
    }
    match exit_error(status, &stderr_buf) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn spawn(argv: &[String]) -> Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ModelError::Process("empty command".into()))?;
    Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ModelError::Process(format!("failed to start '{program}': {e}")))
}

/// Turn a failed exit into an error carrying captured stderr.
fn exit_error(status: ExitStatus, stderr_buf: &Arc<Mutex<String>>) -> Option<ModelError> {
    if status.success() {
        return None;
    }
    let stderr = stderr_buf
        .lock()
        .ok()
        .map(|b| b.clone())
        .unwrap_or_default();
    let head = match status.code() {
        Some(code) => format!("model command exited with code {code}"),
        None => "model command terminated by signal".to_string(),
    };
    warn!(status = %head, "model command failed");
    let msg = if stderr.is_empty() {
        head
    } else {
        format!("{head}\nstderr: {stderr}")
    };
    Some(ModelError::Process(msg))
}

// ─── Utf8Decoder ──────────────────────────────────────────────────────────

/// Incremental UTF-8 decoding across arbitrary byte boundaries.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn decoder_handles_split_multibyte() {
        let bytes = "aé✓".as_bytes();
        let mut d = Utf8Decoder::default();
        let mut out = String::new();
        for b in bytes {
            out.push_str(&d.push(std::slice::from_ref(b)));
        }
        out.push_str(&d.finish());
        assert_eq!(out, "aé✓");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut d = Utf8Decoder::default();
        assert_eq!(d.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(CommandSource::new(vec![]).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_stdout_and_receives_conversation() {
        let src = CommandSource::new(vec![
            "sh".into(),
            "-c".into(),
            "read line; case \"$line\" in *'\"hello there\"'*) printf 'got it';; *) printf 'missing';; esac"
                .into(),
        ])
        .unwrap();
        let chunks: Vec<_> = src
            .stream(vec![ChatMessage::user("hello there")])
            .collect()
            .await;
        let text: String = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(text, "got it");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_surfaces_stderr() {
        let src = CommandSource::new(vec![
            "sh".into(),
            "-c".into(),
            "cat >/dev/null; printf partial; echo boom >&2; exit 2".into(),
        ])
        .unwrap();
        let items: Vec<_> = src.stream(vec![]).collect().await;
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        match items.last().unwrap() {
            Err(ModelError::Process(msg)) => {
                assert!(msg.contains("code 2"), "{msg}");
                assert!(msg.contains("boom"), "{msg}");
            }
            other => panic!("expected process error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_the_stream_kills_a_silent_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let pidfile = dir.path().join("pid");
        let script = format!("cat >/dev/null; echo $$ > '{}'; exec sleep 30", pidfile.display());
        let src = CommandSource::new(vec!["sh".into(), "-c".into(), script]).unwrap();

        let stream = src.stream(vec![]);
        let mut pid = String::new();
        for _ in 0..200 {
            pid = std::fs::read_to_string(&pidfile).unwrap_or_default();
            if pid.ends_with('\n') {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let pid = pid.trim().to_string();
        assert!(!pid.is_empty(), "command never started");
        drop(stream);

        let alive = || {
            std::process::Command::new("kill")
                .args(["-0", &pid])
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        };
        let mut gone = false;
        for _ in 0..200 {
            if !alive() {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(gone, "model command {pid} still running after the stream was dropped");
    }

    #[tokio::test]
    async fn missing_program_yields_error_item() {
        let src = CommandSource::new(vec!["no-such-model-binary-xyz".into()]).unwrap();
        let items: Vec<_> = src.stream(vec![]).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ModelError::Process(_))));
    }
}
