//! Named mutual exclusion across cooperating conveyor processes.
//!
//! Lock names are namespaced by project:
//! - `<project>.stage.<signature>` guards the check-build-store critical section of one stage
//! - `<project>.images` guards project-wide stages maintenance (flush)
//!
//! Locks are not re-entrant. Dropping a [`LockToken`] releases the lock.

mod file;
mod memory;

use std::any::Any;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::registry::Retryable;
use crate::signature::Signature;

pub use file::FileLockService;
pub use memory::MemoryLockService;

pub fn stage_lock_name(project: &str, signature: &Signature) -> String {
  format!("{}.stage.{}", project, signature)
}

pub fn images_lock_name(project: &str) -> String {
  format!("{}.images", project)
}

/// Who holds a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub command: String,
  /// Unix seconds.
  pub acquired_at: u64,
}

impl LockHolder {
  pub fn current(command: &str) -> Self {
    LockHolder {
      pid: std::process::id(),
      command: command.to_string(),
      acquired_at: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
    }
  }
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} (PID {}, acquired at unix time {})",
      self.command, self.pid, self.acquired_at
    )
  }
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("timed out after {} waiting for lock {name}{}", humanize(.timeout), held_by(.holder))]
  Timeout {
    name: String,
    timeout: Duration,
    holder: Option<LockHolder>,
  },

  #[error("invalid lock name {0:?}")]
  InvalidName(String),

  #[error("lock {name} failed: {source}")]
  Io {
    name: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn humanize(timeout: &Duration) -> String {
  format!("{:.1}s", timeout.as_secs_f64())
}

fn held_by(holder: &Option<LockHolder>) -> String {
  holder.as_ref().map(|h| format!(", held by {}", h)).unwrap_or_default()
}

impl LockError {
  /// A timeout may succeed later; other failures will not.
  pub fn is_retryable(&self) -> bool {
    matches!(self, LockError::Timeout { .. })
  }
}

impl Retryable for LockError {
  fn is_retryable(&self) -> bool {
    LockError::is_retryable(self)
  }
}

/// Proof of holding a named lock. The lock is released when the token is dropped.
pub struct LockToken {
  name: String,
  holder: LockHolder,
  _guard: Box<dyn Any + Send + Sync>,
}

impl LockToken {
  pub(crate) fn new(name: String, holder: LockHolder, guard: Box<dyn Any + Send + Sync>) -> Self {
    LockToken {
      name,
      holder,
      _guard: guard,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn holder(&self) -> &LockHolder {
    &self.holder
  }
}

impl fmt::Debug for LockToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LockToken")
      .field("name", &self.name)
      .field("holder", &self.holder)
      .finish_non_exhaustive()
  }
}

impl Drop for LockToken {
  fn drop(&mut self) {
    debug!(lock = %self.name, "released lock");
  }
}

#[async_trait]
pub trait LockService: Send + Sync {
  /// Wait up to `timeout` for exclusive ownership of `name`.
  async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockToken, LockError>;

  fn release(&self, token: LockToken) {
    drop(token);
  }
}

/// Lock names end up in file names, so keep them to a portable alphabet.
pub(crate) fn validate_name(name: &str) -> Result<(), LockError> {
  let valid = !name.is_empty()
    && name.len() <= 200
    && !name.starts_with('.')
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
  if valid {
    Ok(())
  } else {
    Err(LockError::InvalidName(name.to_string()))
  }
}
