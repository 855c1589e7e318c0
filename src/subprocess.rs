// src/subprocess.rs

//! Subprocess execution with timeouts and cooperative cancellation
//!
//! All external tools (git, package managers, bazel) run through here. The
//! child's stdout and stderr are captured in full and surfaced verbatim on
//! failure. Cancellation is polled while waiting; the child receives a kill
//! on cancel or timeout, and the invocation reports `Cancelled` rather than
//! a tool failure.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use wait_timeout::ChildExt;

use crate::cancel::CancelFlag;
use crate::error::{Error, Result};

/// Poll interval while waiting on a child
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Captured result of a finished subprocess
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    /// stdout and stderr concatenated for diagnostics
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// A command to run, with its execution limits
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Rendered command line for logs and error messages
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Run to completion, capturing output. Kills the child on timeout or
/// cancellation.
pub fn run(spec: &CommandSpec, cancel: &CancelFlag) -> Result<CommandOutput> {
    cancel.check()?;
    debug!("exec: {}", spec.display());

    let mut command = Command::new(&spec.program);
    command.args(&spec.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to spawn '{}': {e}", spec.program),
        ))
    })?;

    // Drain pipes on their own threads so a chatty child never blocks on a
    // full pipe while we wait on it
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_all(stdout));
    let stderr_reader = thread::spawn(move || read_all(stderr));

    let started = Instant::now();
    let status = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            drain(stdout_reader, stderr_reader);
            return Err(Error::Cancelled);
        }
        if let Some(timeout) = spec.timeout {
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                drain(stdout_reader, stderr_reader);
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("'{}' timed out after {:?}", spec.display(), timeout),
                )));
            }
        }
        match child.wait_timeout(WAIT_SLICE)? {
            Some(status) => break status,
            None => continue,
        }
    };

    let (stdout, stderr) = drain(stdout_reader, stderr_reader);
    Ok(CommandOutput { status_code: status.code(), stdout, stderr })
}

fn read_all<R: Read>(pipe: Option<R>) -> String {
    let mut buffer = String::new();
    if let Some(mut pipe) = pipe {
        let mut bytes = Vec::new();
        let _ = pipe.read_to_end(&mut bytes);
        buffer = String::from_utf8_lossy(&bytes).into_owned();
    }
    buffer
}

fn drain(
    stdout: thread::JoinHandle<String>,
    stderr: thread::JoinHandle<String>,
) -> (String, String) {
    (stdout.join().unwrap_or_default(), stderr.join().unwrap_or_default())
}

/// Whether a program is on PATH
pub fn available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout() {
        let spec = CommandSpec::new("echo", &["hello"]);
        let output = run(&spec, &CancelFlag::new()).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let spec = CommandSpec::new("sh", &["-c", "echo oops >&2; exit 3"]);
        let output = run(&spec, &CancelFlag::new()).unwrap();
        assert!(!output.success());
        assert_eq!(output.status_code, Some(3));
        assert!(output.combined().contains("oops"));
    }

    #[test]
    fn test_timeout_kills_child() {
        let spec = CommandSpec::new("sleep", &["5"]).timeout(Duration::from_millis(200));
        let started = Instant::now();
        let result = run(&spec, &CancelFlag::new());
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_pre_cancelled_flag_short_circuits() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let spec = CommandSpec::new("echo", &["never"]);
        assert!(matches!(run(&spec, &cancel), Err(Error::Cancelled)));
    }

    #[test]
    fn test_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-2931", &[]);
        assert!(run(&spec, &CancelFlag::new()).is_err());
    }
}
