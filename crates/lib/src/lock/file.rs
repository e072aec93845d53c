//! File-based locks: one lock file per name, held with `flock` (Unix) or
//! `LockFileEx` (Windows). Works across processes sharing the locks directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{LockError, LockHolder, LockService, LockToken, validate_name};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct FileLockService {
  dir: PathBuf,
  command: String,
  poll_interval: Duration,
}

impl FileLockService {
  /// `command` is recorded in lock files so contention errors can name the holder.
  pub fn new(dir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
    FileLockService {
      dir: dir.into(),
      command: command.into(),
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }

  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn lock_path(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{}.lock", name))
  }

  fn open(&self, name: &str, path: &Path) -> Result<File, LockError> {
    let io_err = |source| LockError::Io {
      name: name.to_string(),
      path: path.to_path_buf(),
      source,
    };
    std::fs::create_dir_all(&self.dir).map_err(io_err)?;
    OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(path)
      .map_err(io_err)
  }
}

#[async_trait]
impl LockService for FileLockService {
  async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockToken, LockError> {
    validate_name(name)?;
    let path = self.lock_path(name);
    let deadline = Instant::now() + timeout;
    let mut announced = false;

    loop {
      let file = self.open(name, &path)?;
      match try_lock_exclusive(&file) {
        Ok(()) => {
          let holder = LockHolder::current(&self.command);
          write_holder(&file, &holder).map_err(|source| LockError::Io {
            name: name.to_string(),
            path: path.clone(),
            source,
          })?;
          debug!(lock = %name, path = ?path, "acquired lock");
          return Ok(LockToken::new(name.to_string(), holder, Box::new(file)));
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
          if Instant::now() >= deadline {
            return Err(LockError::Timeout {
              name: name.to_string(),
              timeout,
              holder: read_holder(&path),
            });
          }
          if !announced {
            info!(lock = %name, holder = ?read_holder(&path), "waiting for lock");
            announced = true;
          }
          drop(file);
          tokio::time::sleep(self.poll_interval.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
        Err(source) => {
          return Err(LockError::Io {
            name: name.to_string(),
            path,
            source,
          });
        }
      }
    }
  }
}

fn write_holder(file: &File, holder: &LockHolder) -> io::Result<()> {
  let mut file = file;
  file.set_len(0)?;
  file.seek(SeekFrom::Start(0))?;
  let json = serde_json::to_vec_pretty(holder).map_err(io::Error::other)?;
  file.write_all(&json)?;
  file.flush()
}

fn read_holder(path: &Path) -> Option<LockHolder> {
  let mut contents = String::new();
  File::open(path).ok()?.read_to_string(&mut contents).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized,
  // and the handle stays open for the duration of the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Err(io::Error::from(io::ErrorKind::WouldBlock))
  } else {
    Err(err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tempfile::TempDir;

  fn service(temp: &TempDir) -> FileLockService {
    FileLockService::new(temp.path().join("locks"), "conveyor test").with_poll_interval(Duration::from_millis(5))
  }

  #[tokio::test]
  async fn acquire_writes_holder() {
    let temp = TempDir::new().unwrap();
    let locks = service(&temp);

    let token = locks.acquire("demo.images", Duration::from_secs(1)).await.unwrap();
    assert_eq!(token.name(), "demo.images");
    assert_eq!(token.holder().pid, std::process::id());
    assert!(locks.lock_path("demo.images").exists());

    #[cfg(unix)]
    {
      let holder = read_holder(&locks.lock_path("demo.images")).unwrap();
      assert_eq!(holder.command, "conveyor test");
    }
  }

  #[tokio::test]
  async fn contended_lock_times_out() {
    let temp = TempDir::new().unwrap();
    let locks = service(&temp);

    let _held = locks.acquire("demo.images", Duration::from_secs(1)).await.unwrap();
    let err = locks.acquire("demo.images", Duration::from_millis(30)).await.unwrap_err();

    match err {
      LockError::Timeout { name, .. } => assert_eq!(name, "demo.images"),
      other => panic!("expected timeout, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn lock_released_on_drop() {
    let temp = TempDir::new().unwrap();
    let locks = service(&temp);

    {
      let _token = locks.acquire("demo.images", Duration::from_secs(1)).await.unwrap();
    }
    locks.acquire("demo.images", Duration::from_millis(50)).await.unwrap();
  }

  #[tokio::test]
  async fn explicit_release() {
    let temp = TempDir::new().unwrap();
    let locks = service(&temp);

    let token = locks.acquire("demo.images", Duration::from_secs(1)).await.unwrap();
    locks.release(token);
    locks.acquire("demo.images", Duration::from_millis(50)).await.unwrap();
  }

  #[tokio::test]
  async fn distinct_names_do_not_contend() {
    let temp = TempDir::new().unwrap();
    let locks = service(&temp);

    let _a = locks.acquire("demo.stage.a", Duration::from_secs(1)).await.unwrap();
    let _b = locks.acquire("demo.stage.b", Duration::from_millis(50)).await.unwrap();
  }

  #[tokio::test]
  async fn waiter_acquires_after_holder_releases() {
    let temp = TempDir::new().unwrap();
    let locks = Arc::new(service(&temp));
    let inside = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
      let locks = locks.clone();
      let inside = inside.clone();
      handles.push(tokio::spawn(async move {
        let _token = locks.acquire("demo.stage.x", Duration::from_secs(10)).await.unwrap();
        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        inside.fetch_sub(1, Ordering::SeqCst);
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }
  }

  #[tokio::test]
  async fn invalid_name_rejected() {
    let temp = TempDir::new().unwrap();
    let err = service(&temp).acquire("../x", Duration::from_millis(10)).await.unwrap_err();
    assert!(matches!(err, LockError::InvalidName(_)));
  }
}
