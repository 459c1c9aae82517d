//! Subprocess execution for stage actions.
//!
//! Every tool invocation (shell commands, git, cmake) goes through a
//! [`CommandRunner`], so the lifecycle can be driven against a fake in tests.
//! [`ProcessRunner`] starts each child in its own process group and kills the
//! whole group when the run is cancelled.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines of stderr kept in a failure report.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ToolError {
  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("command failed with exit code {code:?}: {command}{}", stderr_suffix(.stderr))]
  Failed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("command cancelled: {command}")]
  Cancelled { command: String },
}

fn stderr_suffix(stderr: &str) -> String {
  if stderr.is_empty() {
    String::new()
  } else {
    format!("\n{}", stderr)
  }
}

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: PathBuf,
  pub env: BTreeMap<String, String>,
}

impl Invocation {
  pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: cwd.into(),
      env: BTreeMap::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }
}

impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      if arg.contains(char::is_whitespace) {
        write!(f, " \"{}\"", arg)?;
      } else {
        write!(f, " {}", arg)?;
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
  pub stdout: String,
  pub stderr: String,
}

/// Runs tool invocations on behalf of the lifecycle.
pub trait CommandRunner: Send + Sync {
  fn run(
    &self,
    invocation: &Invocation,
    cancel: &CancellationToken,
  ) -> impl Future<Output = Result<CommandOutput, ToolError>> + Send;
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
  async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<CommandOutput, ToolError> {
    let command_line = invocation.to_string();
    if cancel.is_cancelled() {
      return Err(ToolError::Cancelled { command: command_line });
    }
    info!(command = %command_line, "executing command");

    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .current_dir(&invocation.cwd)
      .envs(&invocation.env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    debug!(program = %invocation.program, cwd = ?invocation.cwd, "spawning process");
    let child = command.spawn().map_err(|source| ToolError::Spawn {
      program: invocation.program.clone(),
      source,
    })?;
    let pid = child.id();

    let output = tokio::select! {
      output = child.wait_with_output() => output.map_err(|source| ToolError::Spawn {
        program: invocation.program.clone(),
        source,
      })?,
      _ = cancel.cancelled() => {
        warn!(command = %command_line, pid = ?pid, "cancelling command");
        if let Some(pid) = pid {
          kill_process_group(pid);
        }
        return Err(ToolError::Cancelled { command: command_line });
      }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
      if !stdout.is_empty() {
        debug!(stdout = %stdout, "command stdout");
      }
      return Err(ToolError::Failed {
        command: command_line,
        code: output.status.code(),
        stderr: tail(&stderr, STDERR_TAIL_LINES),
      });
    }

    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command output");
    }
    Ok(CommandOutput { stdout, stderr })
  }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
  use nix::sys::signal::{Signal, killpg};
  use nix::unistd::Pid;

  if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
    debug!(pid, error = %err, "failed to kill process group");
  }
}

// The child itself is killed when its handle drops.
#[cfg(windows)]
fn kill_process_group(_pid: u32) {}

fn tail(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.lines().collect();
  all[all.len().saturating_sub(lines)..].join("\n")
}

/// The shell and the arguments that precede the script.
///
/// Defaults to `/bin/sh` on Unix and `powershell.exe` on Windows rather than
/// `$SHELL`, which may source user profiles.
pub fn shell_command(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::shell_invocation;
  use std::time::{Duration, Instant};
  use tempfile::TempDir;

  #[tokio::test]
  async fn captures_stdout() {
    let temp = TempDir::new().unwrap();
    let out = ProcessRunner
      .run(&shell_invocation("echo hello", temp.path()), &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(out.stdout, "hello");
  }

  #[tokio::test]
  async fn passes_environment() {
    let temp = TempDir::new().unwrap();
    let invocation = shell_invocation(&crate::util::testutil::echo_env("MY_VAR"), temp.path()).env("MY_VAR", "my_value");
    let out = ProcessRunner.run(&invocation, &CancellationToken::new()).await.unwrap();
    assert_eq!(out.stdout, "my_value");
  }

  #[tokio::test]
  async fn nonzero_exit_is_failure() {
    let temp = TempDir::new().unwrap();
    let err = ProcessRunner
      .run(&shell_invocation("exit 3", temp.path()), &CancellationToken::new())
      .await
      .unwrap_err();
    assert!(matches!(err, ToolError::Failed { code: Some(3), .. }));
  }

  #[tokio::test]
  async fn missing_program_is_spawn_error() {
    let temp = TempDir::new().unwrap();
    let invocation = Invocation::new("kiln-definitely-not-a-program", temp.path());
    let err = ProcessRunner.run(&invocation, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ToolError::Spawn { .. }));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn cancellation_kills_process_group() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("finished");
    let script = format!("(sleep 5; touch {}) & sleep 5", marker.display());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(200)).await;
      trigger.cancel();
    });

    let started = Instant::now();
    let err = ProcessRunner
      .run(&shell_invocation(&script, temp.path()), &cancel)
      .await
      .unwrap_err();

    assert!(matches!(err, ToolError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!marker.exists());
  }

  #[tokio::test]
  async fn already_cancelled_never_spawns() {
    let temp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = ProcessRunner
      .run(&shell_invocation("echo hi", temp.path()), &cancel)
      .await
      .unwrap_err();
    assert!(matches!(err, ToolError::Cancelled { .. }));
  }

  #[test]
  fn shell_with_override() {
    let (shell, args) = shell_command(Some("/usr/bin/bash"));
    assert_eq!(shell, "/usr/bin/bash");
    assert_eq!(args, vec!["-c"]);

    let (_, args) = shell_command(Some("cmd.exe"));
    assert_eq!(args, vec!["/C"]);

    let (_, args) = shell_command(Some("pwsh"));
    assert_eq!(args, vec!["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"]);
  }

  #[test]
  fn display_quotes_arguments_with_spaces() {
    let invocation = Invocation::new("cmake", "/tmp").args(["-S", "my src"]);
    assert_eq!(invocation.to_string(), "cmake -S \"my src\"");
  }

  #[test]
  fn tail_keeps_last_lines() {
    assert_eq!(tail("a\nb\nc", 2), "b\nc");
    assert_eq!(tail("a", 5), "a");
  }
}
