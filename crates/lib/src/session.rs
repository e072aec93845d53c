//! One conveyor invocation's private resources.
//!
//! A session owns a temporary directory under the tmp base and, when SSH keys
//! are requested, a private ssh-agent. Both are torn down by
//! [`Session::close`]; the temp dir is also removed if the session is dropped.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::ssh_agent::{SshAgent, SshAgentError};
use crate::tmp::{ProjectTmpDir, TmpError, TmpManager};

const STAGING_DIR: &str = "staging";

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("project directory {path} is not accessible: {source}")]
  ProjectDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Tmp(#[from] TmpError),

  #[error(transparent)]
  SshAgent(#[from] SshAgentError),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
  pub project_dir: PathBuf,
  pub tmp_base: PathBuf,
  pub ssh_keys: Vec<PathBuf>,
  /// Remove temp dirs left behind by dead processes in the background.
  pub sweep_abandoned: bool,
}

#[derive(Debug)]
pub struct Session {
  project_dir: PathBuf,
  tmp: ProjectTmpDir,
  ssh_agent: SshAgent,
}

impl Session {
  pub async fn open(options: SessionOptions) -> Result<Self, SessionError> {
    let project_dir = dunce::canonicalize(&options.project_dir).map_err(|source| SessionError::ProjectDir {
      path: options.project_dir.clone(),
      source,
    })?;

    let manager = TmpManager::new(&options.tmp_base);
    if options.sweep_abandoned {
      let sweeper = manager.clone();
      tokio::task::spawn_blocking(move || {
        if let Err(e) = sweeper.sweep_abandoned(false) {
          warn!(error = %e, "failed to sweep abandoned temporary directories");
        }
      });
    }

    let tmp = manager.create_project_dir()?;
    let ssh_agent = SshAgent::start(&options.ssh_keys, tmp.path()).await?;

    debug!(project_dir = ?project_dir, tmp = ?tmp.path(), "opened session");
    Ok(Session {
      project_dir,
      tmp,
      ssh_agent,
    })
  }

  pub fn project_dir(&self) -> &Path {
    &self.project_dir
  }

  pub fn tmp_dir(&self) -> &Path {
    self.tmp.path()
  }

  /// Where executors stage in-progress layers.
  pub fn staging_dir(&self) -> PathBuf {
    self.tmp.path().join(STAGING_DIR)
  }

  pub fn ssh_auth_sock(&self) -> Option<&Path> {
    self.ssh_agent.socket()
  }

  /// Stop the ssh agent and remove the temp dir. Failures are logged.
  pub async fn close(self) {
    self.ssh_agent.terminate().await;
    let path = self.tmp.path().to_path_buf();
    if let Err(e) = self.tmp.release() {
      warn!(path = ?path, error = %e, "failed to remove session directory");
    } else {
      debug!(path = ?path, "closed session");
    }
  }
}
