//! Directory layout.
//!
//! Every location can be overridden through environment variables so that
//! CI jobs and tests can isolate state:
//! - `CONVEYOR_HOME`: home directory holding stages, layers, locks and registries
//! - `CONVEYOR_TMP_DIR`: base directory for per-invocation temporary directories

use std::path::{Path, PathBuf};

use crate::consts::APP_NAME;

/// Returns the user's home directory
#[cfg(windows)]
fn user_home() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the user's home directory
#[cfg(not(windows))]
fn user_home() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the conveyor home directory.
///
/// `CONVEYOR_HOME` wins; otherwise the XDG data directory is used.
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  if let Ok(home) = std::env::var("CONVEYOR_HOME") {
    return PathBuf::from(home);
  }
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| user_home().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the conveyor home directory.
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  if let Ok(home) = std::env::var("CONVEYOR_HOME") {
    return PathBuf::from(home);
  }
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| user_home())
    .join(APP_NAME)
}

/// Base directory for per-invocation temporary directories.
pub fn tmp_base_dir() -> PathBuf {
  std::env::var("CONVEYOR_TMP_DIR")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir().join(APP_NAME))
}

/// Local stages storage, one subdirectory per project.
pub fn stages_dir(home: &Path) -> PathBuf {
  home.join("stages")
}

/// Layers produced by the directory executor.
pub fn layers_dir(home: &Path) -> PathBuf {
  home.join("layers")
}

pub fn locks_dir(home: &Path) -> PathBuf {
  home.join("locks")
}
