//! Running stage instructions through the system shell.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use super::ExecuteError;

/// Fallback `PATH` when the conveyor itself runs without one.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Run one instruction with `/bin/sh -c` in `cwd`.
///
/// The environment is cleared except for `PATH`; `HOME` points nowhere useful,
/// locale is `C` and `SOURCE_DATE_EPOCH` is pinned so tools that honour it
/// produce reproducible output. `env` is merged last.
///
/// Returns trimmed stdout.
pub async fn run_instruction(
  instruction: &str,
  cwd: &Path,
  tmp_dir: &Path,
  env: &BTreeMap<String, String>,
) -> Result<String, ExecuteError> {
  info!(instruction = %instruction, "running instruction");
  tokio::fs::create_dir_all(tmp_dir).await?;

  let (shell, shell_args) = shell();
  let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());

  let mut command = Command::new(shell);
  command
    .args(shell_args)
    .arg(instruction)
    .current_dir(cwd)
    .env_clear()
    .env("PATH", path)
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", tmp_dir)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    // 1980-01-01T00:00:00Z
    .env("SOURCE_DATE_EPOCH", "315532800");
  for (key, value) in env {
    command.env(key, value);
  }

  debug!(shell = %shell, cwd = ?cwd, "spawning process");
  let output = command.output().await?;
  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "instruction stdout");
    }
    return Err(ExecuteError::InstructionFailed {
      instruction: instruction.to_string(),
      code: output.status.code(),
      stderr,
    });
  }

  if !stdout.is_empty() {
    debug!(stdout = %stdout, "instruction output");
  }
  Ok(stdout)
}

#[cfg(unix)]
fn shell() -> (&'static str, &'static [&'static str]) {
  ("/bin/sh", &["-c"])
}

#[cfg(windows)]
fn shell() -> (&'static str, &'static [&'static str]) {
  ("cmd.exe", &["/C"])
}
