//! Process spawning.
//!
//! Launches a command, captures stdout/stderr as lines while it runs and
//! optionally mirrors them, answers "Proceed" prompts, or kills the whole
//! process tree once a watched string shows up.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command as ProcessCommand};

use super::config::SpawnConfig;
use super::context;
use super::error::{Result, WorkflowError};

const CONFIRM_PROMPT: &str = "Proceed";

/// Options for [`spawn`].
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Working directory; the ambient one when unset
    pub cwd: Option<PathBuf>,

    /// Reject on non-zero exit or spawn failure instead of setting `error`
    pub throw_on_error: bool,

    /// Copy child output to our own stdout/stderr
    pub mirror: bool,

    /// Write `y` to stdin whenever a chunk contains "Proceed"
    pub auto_confirm: bool,

    /// Kill the process tree the first time this text appears
    pub watch: Option<String>,

    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            throw_on_error: true,
            mirror: false,
            auto_confirm: false,
            watch: None,
            env: Vec::new(),
        }
    }
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded from the `[spawn]` config section.
    pub fn from_config(config: &SpawnConfig) -> Self {
        Self { mirror: config.mirror_output, auto_confirm: config.auto_confirm, ..Self::default() }
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = throw;
        self
    }

    #[must_use]
    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    #[must_use]
    pub fn auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    #[must_use]
    pub fn watch(mut self, watch: impl Into<String>) -> Self {
        self.watch = Some(watch.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Captured result of a spawned command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,

    /// Exit code, if the process exited normally
    pub code: Option<i32>,

    /// Whether the process tree was killed because of the watch string
    pub killed: bool,

    /// Failure message when not throwing
    pub error: Option<String>,

    pub duration: Duration,
}

impl SpawnOutput {
    /// Check if the command completed without error.
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Stdout joined with newlines.
    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    /// Stderr joined with newlines.
    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Splits byte chunks into lines.
#[derive(Debug, Default)]
struct LineBuffer {
    lines: Vec<String>,
    partial: Vec<u8>,
    tail: String,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.partial.extend_from_slice(chunk);
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            self.lines.push(text.trim_end_matches(['\r', '\n']).to_string());
        }
    }

    /// `text` prefixed with the end of the previous chunks, so a string
    /// split across reads is still found. Up to `keep` bytes are carried.
    fn window(&mut self, text: &str, keep: usize) -> String {
        let mut window = std::mem::take(&mut self.tail);
        window.push_str(text);
        let mut start = window.len().saturating_sub(keep);
        while !window.is_char_boundary(start) {
            start -= 1;
        }
        self.tail = window[start..].to_string();
        window
    }

    fn finish(mut self) -> Vec<String> {
        if !self.partial.is_empty() {
            let text = String::from_utf8_lossy(&self.partial).into_owned();
            self.lines.push(text);
        }
        self.lines
    }
}

struct Capture<'a> {
    options: &'a SpawnOptions,
    stdin: Option<ChildStdin>,
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl Capture<'_> {
    /// Record a chunk. Returns true when the watch string was seen.
    async fn chunk(&mut self, stream: Stream, bytes: &[u8]) -> bool {
        let text = String::from_utf8_lossy(bytes);

        if self.options.mirror {
            match stream {
                Stream::Stdout => {
                    let _ = std::io::stdout().write_all(bytes);
                }
                Stream::Stderr => {
                    let _ = std::io::stderr().write_all(bytes);
                }
            }
        }

        let buffer = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        buffer.push(bytes);
        let watch = self.options.watch.as_deref();
        let keep = watch.map_or(0, str::len).max(CONFIRM_PROMPT.len()).saturating_sub(1);
        let text = buffer.window(&text, keep);

        if self.options.auto_confirm && text.contains(CONFIRM_PROMPT) {
            if let Some(stdin) = self.stdin.as_mut() {
                if let Err(err) = stdin.write_all(b"y\n").await {
                    tracing::debug!(error = %err, "Could not answer confirmation prompt");
                }
                let _ = stdin.flush().await;
            }
        }

        watch.is_some_and(|watch| text.contains(watch))
    }

    fn into_output(self) -> SpawnOutput {
        SpawnOutput { stdout: self.stdout.finish(), stderr: self.stderr.finish(), ..SpawnOutput::default() }
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> usize {
    reader.read(buf).await.unwrap_or(0)
}

/// Render a command line for messages.
pub fn render_command(command: &str, args: &[String]) -> String {
    std::iter::once(command).chain(args.iter().map(String::as_str)).collect::<Vec<_>>().join(" ")
}

/// Run a command to completion, capturing its output.
pub async fn spawn(command: &str, args: &[String], options: SpawnOptions) -> Result<SpawnOutput> {
    let cwd = options.cwd.clone().unwrap_or_else(context::cwd);
    if !cwd.is_dir() {
        return Err(WorkflowError::Precondition(format!(
            "Working directory {} does not exist",
            cwd.display()
        )));
    }

    let rendered = render_command(command, args);
    tracing::debug!(command = %rendered, cwd = %cwd.display(), "Spawning");
    let start = Instant::now();

    let mut cmd = ProcessCommand::new(command);
    cmd.args(args)
        .current_dir(&cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if options.auto_confirm { Stdio::piped() } else { Stdio::null() })
        .kill_on_drop(true);
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            let output = SpawnOutput { duration: start.elapsed(), ..SpawnOutput::default() };
            return finish(&options, rendered, output, format!("failed to start: {}", err));
        }
    };

    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(WorkflowError::Command {
            command: rendered,
            message: "output pipes unavailable".to_string(),
        });
    };

    let mut capture =
        Capture { options: &options, stdin: child.stdin.take(), stdout: LineBuffer::default(), stderr: LineBuffer::default() };
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];
    let (mut out_open, mut err_open) = (true, true);
    let mut killed = false;

    while out_open || err_open {
        let watched = tokio::select! {
            n = read_chunk(&mut stdout, &mut out_buf), if out_open => {
                if n == 0 {
                    out_open = false;
                    false
                } else {
                    capture.chunk(Stream::Stdout, &out_buf[..n]).await
                }
            }
            n = read_chunk(&mut stderr, &mut err_buf), if err_open => {
                if n == 0 {
                    err_open = false;
                    false
                } else {
                    capture.chunk(Stream::Stderr, &err_buf[..n]).await
                }
            }
        };

        if watched {
            tracing::debug!(command = %rendered, "Watch string seen, killing process tree");
            kill_tree(&mut child).await;
            killed = true;
            break;
        }
    }

    let mut output = capture.into_output();
    output.killed = killed;

    if killed {
        output.duration = start.elapsed();
        return Ok(output);
    }

    let status = match child.wait().await {
        Ok(status) => status,
        Err(err) => {
            output.duration = start.elapsed();
            return finish(&options, rendered, output, format!("failed to wait: {}", err));
        }
    };
    output.code = status.code();
    output.duration = start.elapsed();

    if status.success() {
        return Ok(output);
    }

    let code = status.code().map_or_else(|| "signal".to_string(), |code| code.to_string());
    let mut message = format!("exited with code {}", code);
    if !output.stderr.is_empty() {
        message.push_str(": ");
        message.push_str(&output.stderr_text());
    }
    finish(&options, rendered, output, message)
}

fn finish(
    options: &SpawnOptions,
    command: String,
    mut output: SpawnOutput,
    message: String,
) -> Result<SpawnOutput> {
    if options.throw_on_error {
        return Err(WorkflowError::Command { command, message });
    }
    tracing::warn!(command = %command, error = %message, "Command failed");
    output.error = Some(message);
    Ok(output)
}

/// Kill the child and everything it started.
async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        let status = ProcessCommand::new("kill")
            .args(["-s", "KILL", "--", &format!("-{}", pid)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        #[cfg(windows)]
        let status = ProcessCommand::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(err) = status {
            tracing::debug!(pid, error = %err, "Process tree kill failed");
        }
    }
    let _ = child.kill().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_lines() {
        let output = spawn("sh", &sh("echo one; echo two; echo err >&2"), SpawnOptions::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, vec!["one", "two"]);
        assert_eq!(output.stderr, vec!["err"]);
        assert_eq!(output.code, Some(0));
        assert!(output.success());
        assert!(!output.killed);
    }

    #[tokio::test]
    async fn test_nonzero_exit_rejects() {
        let err = spawn("sh", &sh("echo oops >&2; exit 3"), SpawnOptions::new()).await.unwrap_err();
        match err {
            WorkflowError::Command { command, message } => {
                assert!(command.starts_with("sh -c"));
                assert!(message.contains("code 3"));
                assert!(message.contains("oops"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_throwing() {
        let output = spawn("sh", &sh("echo partial; exit 2"), SpawnOptions::new().throw_on_error(false))
            .await
            .unwrap();
        assert_eq!(output.code, Some(2));
        assert_eq!(output.stdout, vec!["partial"]);
        assert!(output.error.unwrap().contains("code 2"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = spawn("definitely-not-a-binary-xyz", &[], SpawnOptions::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Command { .. }));

        let output = spawn("definitely-not-a-binary-xyz", &[], SpawnOptions::new().throw_on_error(false))
            .await
            .unwrap();
        assert!(output.error.is_some());
    }

    #[tokio::test]
    async fn test_missing_cwd_is_precondition() {
        let err = spawn("true", &[], SpawnOptions::new().cwd("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_watch_kills_early() {
        let started = Instant::now();
        let output = tokio::time::timeout(
            Duration::from_secs(20),
            spawn("sh", &sh("echo booting; echo ready; sleep 30"), SpawnOptions::new().watch("ready")),
        )
        .await
        .expect("watch did not stop the process")
        .unwrap();
        assert!(output.killed);
        assert!(output.stdout.contains(&"ready".to_string()));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_watch_split_across_writes() {
        let output = tokio::time::timeout(
            Duration::from_secs(20),
            spawn(
                "sh",
                &sh("printf 'server rea'; sleep 0.3; printf 'dy\\n'; sleep 30"),
                SpawnOptions::new().watch("ready"),
            ),
        )
        .await
        .expect("watch did not stop the process")
        .unwrap();
        assert!(output.killed);
        assert_eq!(output.stdout, ["server ready"]);
    }

    #[test]
    fn test_window_carries_previous_chunk_end() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.window("booting\nrea", 4), "booting\nrea");
        assert_eq!(buffer.window("dy\n", 4), "\nready\n");
        assert_eq!(buffer.window("é", 1), "ady\né");
        assert_eq!(buffer.window("x", 0), "éx");
    }

    #[tokio::test]
    async fn test_auto_confirm_answers_prompt() {
        let output = spawn(
            "sh",
            &sh("echo 'Proceed? (y/n)'; read answer; echo \"got $answer\""),
            SpawnOptions::new().auto_confirm(true),
        )
        .await
        .unwrap();
        assert_eq!(output.stdout.last().map(String::as_str), Some("got y"));
    }

    #[tokio::test]
    async fn test_uses_ambient_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let output = context::with_cwd(dir.path(), spawn("ls", &[], SpawnOptions::new())).await.unwrap();
        assert_eq!(output.stdout, vec!["marker.txt"]);
    }

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"hel");
        buffer.push(b"lo\r\nwor");
        buffer.push(b"ld");
        assert_eq!(buffer.finish(), vec!["hello", "world"]);
    }
}
