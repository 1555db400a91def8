//! External Command Execution
//!
//! Runs BLAST and DefenseFinder processes to completion. A non-zero exit
//! becomes [`AnnotateError::Execution`]; a tripped [`CancelToken`] kills the
//! child and yields [`AnnotateError::Cancelled`].
//!
//! On Unix each child leads its own process group, and cancellation kills
//! the whole group. DefenseFinder forks macsyfinder and hmmsearch workers
//! that would otherwise outlive it and keep its output pipes open.
//!
//! The [`CommandRunner`] trait is the seam the orchestrator is generic over,
//! so tests can substitute a runner that writes canned tool output.

use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{AnnotateError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag telling in-flight and queued work to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Command description
// ============================================================================

/// A fully specified external invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    /// Name used in diagnostics and errors ("virulence", "defense").
    pub operation: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Redirect standard output to this file instead of capturing it.
    pub stdout_path: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(operation: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            operation: operation.into(),
            program: program.into(),
            args: Vec::new(),
            stdout_path: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a `flag value` pair.
    pub fn opt(self, flag: &str, value: impl Into<OsString>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    /// Base name of the program, for error messages.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push('"');
                line.push_str(&arg);
                line.push('"');
            } else {
                line.push_str(&arg);
            }
        }
        line
    }

    /// Value following `flag`, if present.
    pub fn value_of(&self, flag: &str) -> Option<&Path> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(Path::new)
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

// ============================================================================
// Runner
// ============================================================================

pub trait CommandRunner: Send + Sync {
    /// Runs `cmd` to completion.
    ///
    /// # Errors
    /// - `Execution` if the process cannot start or exits non-zero
    /// - `Cancelled` if `cancel` trips while the process runs
    fn run(&self, cmd: &ToolCommand, cancel: &CancelToken) -> Result<ToolOutput>;
}

/// Runs commands as child processes of this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &ToolCommand, cancel: &CancelToken) -> Result<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(AnnotateError::Cancelled { operation: cmd.operation.clone() });
        }

        let stdout = match &cmd.stdout_path {
            Some(path) => Stdio::from(File::create(path).map_err(|e| AnnotateError::io(path, e))?),
            None => Stdio::piped(),
        };

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| AnnotateError::Execution {
                tool: cmd.tool_name(),
                operation: cmd.operation.clone(),
                code: None,
                stderr: format!("failed to start {}: {}", cmd.program.display(), e),
            })?;

        // Drain pipes on their own threads so a chatty child never blocks.
        let stdout_reader = child.stdout.take().map(spawn_drain);
        let stderr_reader = child.stderr.take().map(spawn_drain);

        let status = match wait_or_kill(&mut child, cancel) {
            Ok(Wait::Exited(status)) => status,
            // Drain threads are detached: a process outside the group may
            // still hold the pipes.
            Ok(Wait::Killed) => {
                return Err(AnnotateError::Cancelled { operation: cmd.operation.clone() })
            }
            Err(e) => {
                return Err(AnnotateError::Execution {
                    tool: cmd.tool_name(),
                    operation: cmd.operation.clone(),
                    code: None,
                    stderr: format!("failed to wait for or kill process {}: {}", child.id(), e),
                })
            }
        };

        let stdout = stdout_reader.map(join_drain).unwrap_or_default();
        let stderr = stderr_reader.map(join_drain).unwrap_or_default();

        if !status.success() {
            return Err(AnnotateError::Execution {
                tool: cmd.tool_name(),
                operation: cmd.operation.clone(),
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

enum Wait {
    Exited(ExitStatus),
    Killed,
}

/// Polls the child until it exits or the token trips. A tripped token kills
/// the child's process group and reaps the child.
fn wait_or_kill(child: &mut Child, cancel: &CancelToken) -> io::Result<Wait> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Wait::Exited(status));
        }
        if cancel.is_cancelled() {
            kill_group(child)?;
            child.wait()?;
            return Ok(Wait::Killed);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) -> io::Result<()> {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill(2) has no memory effects; the negative pid targets the
    // group created at spawn, whose leader is not yet reaped.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // group already gone
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn spawn_drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_command_line_rendering() {
        let cmd = ToolCommand::new("virulence", "/opt/blast/bin/blastp")
            .opt("-evalue", "0.0001")
            .opt("-outfmt", "6 std slen stitle");
        assert_eq!(cmd.tool_name(), "blastp");
        assert_eq!(
            cmd.command_line(),
            "/opt/blast/bin/blastp -evalue 0.0001 -outfmt \"6 std slen stitle\""
        );
        assert_eq!(cmd.value_of("-evalue"), Some(Path::new("0.0001")));
        assert_eq!(cmd.value_of("-db"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_success_captures_stdout() {
        let cmd = ToolCommand::new("echo", "sh").arg("-c").arg("echo hello");
        let out = ProcessRunner.run(&cmd, &CancelToken::new()).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_nonzero_exit() {
        let cmd = ToolCommand::new("metal", "sh").arg("-c").arg("echo boom >&2; exit 3");
        let err = ProcessRunner.run(&cmd, &CancelToken::new()).unwrap_err();
        match err {
            AnnotateError::Execution { tool, operation, code, stderr } => {
                assert_eq!(tool, "sh");
                assert_eq!(operation, "metal");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_process_runner_missing_program() {
        let cmd = ToolCommand::new("symbiosis", "/nonexistent/blastp");
        let err = ProcessRunner.run(&cmd, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, AnnotateError::Execution { code: None, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_stdout_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.txt");
        let cmd = ToolCommand::new("echo", "sh")
            .arg("-c")
            .arg("echo redirected")
            .stdout_to(&out_path);
        let out = ProcessRunner.run(&cmd, &CancelToken::new()).unwrap();
        assert!(out.stdout.is_empty());
        assert_eq!(std::fs::read_to_string(&out_path).unwrap().trim(), "redirected");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_kills_on_cancel() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let start = Instant::now();
        let cmd = ToolCommand::new("degradation", "sh").arg("-c").arg("exec sleep 30");
        let err = ProcessRunner.run(&cmd, &cancel).unwrap_err();
        handle.join().unwrap();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_subprocesses_holding_pipes() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        // The backgrounded sleep inherits stdout/stderr like a forked worker.
        let start = Instant::now();
        let cmd = ToolCommand::new("defense", "sh").arg("-c").arg("sleep 20 & exec sleep 30");
        let err = ProcessRunner.run(&cmd, &cancel).unwrap_err();
        handle.join().unwrap();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
    }

    #[test]
    fn test_pre_cancelled_token_skips_spawn() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let cmd = ToolCommand::new("virulence", "/nonexistent/blastp");
        assert!(ProcessRunner.run(&cmd, &cancel).unwrap_err().is_cancelled());
    }
}
