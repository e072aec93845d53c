//! SSH agent for stage instructions that fetch private sources.
//!
//! Without explicit keys the caller's agent (`SSH_AUTH_SOCK`) is reused. With
//! keys a private agent is started with its socket in the session temp dir and
//! the keys are added to it; the agent lives until [`SshAgent::terminate`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SOCKET_NAME: &str = "ssh-agent.sock";
const SOCKET_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SshAgentError {
  #[error("ssh key {0} does not exist")]
  KeyNotFound(PathBuf),

  #[error("failed to start ssh-agent: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("ssh-agent did not create its socket {0} in time")]
  NoSocket(PathBuf),

  #[error("ssh-add {key} failed: {message}")]
  AddKey { key: PathBuf, message: String },
}

#[derive(Debug)]
pub struct SshAgent {
  socket: Option<PathBuf>,
  child: Option<Child>,
}

impl SshAgent {
  pub async fn start(keys: &[PathBuf], dir: &Path) -> Result<Self, SshAgentError> {
    if keys.is_empty() {
      let socket = std::env::var_os("SSH_AUTH_SOCK")
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);
      debug!(socket = ?socket, "reusing caller ssh agent");
      return Ok(SshAgent { socket, child: None });
    }

    if let Some(missing) = keys.iter().find(|k| !k.is_file()) {
      return Err(SshAgentError::KeyNotFound(missing.clone()));
    }

    let socket = dir.join(SOCKET_NAME);
    let child = Command::new("ssh-agent")
      .arg("-D")
      .arg("-a")
      .arg(&socket)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .spawn()
      .map_err(SshAgentError::Spawn)?;
    let agent = SshAgent {
      socket: Some(socket.clone()),
      child: Some(child),
    };

    let deadline = Instant::now() + SOCKET_WAIT;
    while !socket.exists() {
      if Instant::now() >= deadline {
        agent.terminate().await;
        return Err(SshAgentError::NoSocket(socket));
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for key in keys {
      let output = Command::new("ssh-add")
        .arg(key)
        .env("SSH_AUTH_SOCK", &socket)
        .stdin(Stdio::null())
        .output()
        .await;
      let failure = match output {
        Ok(out) if out.status.success() => None,
        Ok(out) => Some(String::from_utf8_lossy(&out.stderr).trim().to_string()),
        Err(e) => Some(e.to_string()),
      };
      if let Some(message) = failure {
        agent.terminate().await;
        return Err(SshAgentError::AddKey {
          key: key.clone(),
          message,
        });
      }
    }

    info!(socket = ?socket, keys = keys.len(), "started ssh agent");
    Ok(agent)
  }

  /// Socket to export as `SSH_AUTH_SOCK` to stage instructions.
  pub fn socket(&self) -> Option<&Path> {
    self.socket.as_deref()
  }

  /// Stop an agent we started. Failures are logged, never returned.
  pub async fn terminate(mut self) {
    let Some(mut child) = self.child.take() else {
      return;
    };
    if let Err(e) = child.kill().await {
      warn!(error = %e, "failed to terminate ssh-agent");
    } else {
      debug!("terminated ssh agent");
    }
  }
}
