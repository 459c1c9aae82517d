//! Test helpers for shell-based tool invocations.

use std::path::Path;

use crate::execute::runner::{Invocation, shell_command};

/// An invocation running `script` through the default shell in `cwd`.
pub fn shell_invocation(script: &str, cwd: &Path) -> Invocation {
  let (shell, args) = shell_command(None);
  Invocation::new(shell, cwd).args(args).arg(script)
}

/// A script printing environment variable `var`.
#[cfg(unix)]
pub fn echo_env(var: &str) -> String {
  format!("echo \"${}\"", var)
}

#[cfg(windows)]
pub fn echo_env(var: &str) -> String {
  format!("Write-Output $env:{}", var)
}

/// A script creating `rel` (with parent directories) containing `content`.
#[cfg(unix)]
pub fn write_file_script(rel: &str, content: &str) -> String {
  format!("mkdir -p \"$(dirname '{rel}')\" && printf '%s' '{content}' > '{rel}'")
}

#[cfg(windows)]
pub fn write_file_script(rel: &str, content: &str) -> String {
  format!(
    "New-Item -ItemType File -Force -Path '{rel}' | Out-Null; Set-Content -NoNewline -Path '{rel}' -Value '{content}'"
  )
}
