//! Per-invocation temporary directories.
//!
//! Every conveyor invocation works in its own `<tmp-base>/project-<pid>-<n>`
//! directory with an `owner.json` naming the owning process. The directory is
//! removed when the invocation ends; directories left behind by processes that
//! died are removed by [`TmpManager::sweep_abandoned`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::util::fs::dir_size;

const PROJECT_DIR_PREFIX: &str = "project-";
const OWNER_FILE: &str = "owner.json";

static NEXT_DIR: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum TmpError {
  #[error("failed to create temporary directory {path}: {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read temporary directory base {path}: {source}")]
  ReadBase {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmpOwner {
  pub pid: u32,
  pub created_at: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepStats {
  pub scanned: usize,
  pub removed: usize,
  pub bytes_freed: u64,
  pub failed: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepResult {
  pub stats: SweepStats,
  pub removed_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TmpManager {
  base: PathBuf,
}

impl TmpManager {
  pub fn new(base: impl Into<PathBuf>) -> Self {
    TmpManager { base: base.into() }
  }

  pub fn base(&self) -> &Path {
    &self.base
  }

  /// Create a fresh directory owned by the current process.
  pub fn create_project_dir(&self) -> Result<ProjectTmpDir, TmpError> {
    fs::create_dir_all(&self.base).map_err(|source| TmpError::Create {
      path: self.base.clone(),
      source,
    })?;

    let pid = std::process::id();
    loop {
      let n = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
      let path = self.base.join(format!("{}{}-{}", PROJECT_DIR_PREFIX, pid, n));

      match fs::create_dir(&path) {
        Ok(()) => {}
        // Left over by an earlier process that had the same pid.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
        Err(source) => return Err(TmpError::Create { path, source }),
      }

      let owner = TmpOwner {
        pid,
        created_at: SystemTime::now()
          .duration_since(UNIX_EPOCH)
          .unwrap_or_default()
          .as_secs(),
      };
      let json = serde_json::to_vec_pretty(&owner).map_err(|e| TmpError::Create {
        path: path.clone(),
        source: io::Error::other(e),
      })?;
      fs::write(path.join(OWNER_FILE), json).map_err(|source| TmpError::Create {
        path: path.clone(),
        source,
      })?;

      debug!(path = ?path, "created project temporary directory");
      return Ok(ProjectTmpDir { path, released: false });
    }
  }

  /// Remove project directories whose owner process is gone.
  ///
  /// Directories without a readable owner file are left alone. With `dry_run`
  /// nothing is deleted but the result lists what would be.
  pub fn sweep_abandoned(&self, dry_run: bool) -> Result<SweepResult, TmpError> {
    let mut result = SweepResult::default();

    let entries = match fs::read_dir(&self.base) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(result),
      Err(source) => {
        return Err(TmpError::ReadBase {
          path: self.base.clone(),
          source,
        });
      }
    };

    for entry in entries.flatten() {
      let path = entry.path();
      let is_project_dir = path.is_dir()
        && path
          .file_name()
          .and_then(|n| n.to_str())
          .is_some_and(|n| n.starts_with(PROJECT_DIR_PREFIX));
      if !is_project_dir {
        continue;
      }
      result.stats.scanned += 1;

      let Some(owner) = read_owner(&path) else {
        debug!(path = ?path, "skipping temporary directory without owner");
        continue;
      };
      if process_alive(owner.pid) {
        continue;
      }

      let size = dir_size(&path);
      if dry_run {
        result.stats.removed += 1;
        result.stats.bytes_freed += size;
        result.removed_paths.push(path);
        continue;
      }

      match fs::remove_dir_all(&path) {
        Ok(()) => {
          debug!(path = ?path, pid = owner.pid, "removed abandoned temporary directory");
          result.stats.removed += 1;
          result.stats.bytes_freed += size;
          result.removed_paths.push(path);
        }
        Err(e) => {
          warn!(path = ?path, error = %e, "failed to remove abandoned temporary directory");
          result.stats.failed += 1;
        }
      }
    }

    info!(
      scanned = result.stats.scanned,
      removed = result.stats.removed,
      bytes_freed = result.stats.bytes_freed,
      dry_run,
      "temporary directory sweep complete"
    );
    Ok(result)
  }
}

fn read_owner(dir: &Path) -> Option<TmpOwner> {
  let contents = fs::read(dir.join(OWNER_FILE)).ok()?;
  serde_json::from_slice(&contents).ok()
}

/// A temporary directory owned by this invocation. Removed on
/// [`release`](ProjectTmpDir::release) or drop.
#[derive(Debug)]
pub struct ProjectTmpDir {
  path: PathBuf,
  released: bool,
}

impl ProjectTmpDir {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn release(mut self) -> io::Result<()> {
    self.released = true;
    remove_if_present(&self.path)
  }
}

impl Drop for ProjectTmpDir {
  fn drop(&mut self) {
    if !self.released
      && let Err(e) = remove_if_present(&self.path)
    {
      warn!(path = ?self.path, error = %e, "failed to remove temporary directory");
    }
  }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
  match fs::remove_dir_all(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
  use rustix::io::Errno;
  use rustix::process::{Pid, test_kill_process};

  let Some(pid) = i32::try_from(pid).ok().and_then(Pid::from_raw) else {
    return false;
  };
  match test_kill_process(pid) {
    Ok(()) => true,
    // The process exists but belongs to someone else.
    Err(Errno::PERM) => true,
    Err(_) => false,
  }
}

/// Whether a process with `pid` exists.
#[cfg(windows)]
pub fn process_alive(pid: u32) -> bool {
  use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
  use windows_sys::Win32::System::Threading::{GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

  // SAFETY: OpenProcess returns a null handle on failure; the handle is closed
  // before returning and exit_code outlives the call that writes it.
  unsafe {
    let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
    if handle.is_null() {
      return false;
    }
    let mut exit_code = 0u32;
    let ok = GetExitCodeProcess(handle, &mut exit_code);
    CloseHandle(handle);
    ok != 0 && exit_code == STILL_ACTIVE as u32
  }
}
