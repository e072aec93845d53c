//! Shared helpers for conveyor integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conveyor_lib::config::{ProjectConfig, load_config};
use conveyor_lib::conveyor::{Backends, Conveyor, ConveyorOptions};
use conveyor_lib::executor::{BuiltLayer, DirExecutor, ExecuteError, StageExecutor, StageJob};
use conveyor_lib::lock::FileLockService;
use conveyor_lib::registry::RetryPolicy;
use conveyor_lib::storage::LocalStagesStorage;
use tempfile::TempDir;

static NEXT_STAGING: AtomicUsize = AtomicUsize::new(0);

/// Directory executor that counts executed stages.
pub struct CountingExecutor {
  inner: DirExecutor,
  count: AtomicUsize,
}

impl CountingExecutor {
  pub fn new(layers: &Path) -> Self {
    CountingExecutor {
      inner: DirExecutor::new(layers),
      count: AtomicUsize::new(0),
    }
  }

  pub fn count(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl StageExecutor for CountingExecutor {
  fn name(&self) -> &'static str {
    self.inner.name()
  }

  async fn build_stage(&self, job: &StageJob) -> Result<BuiltLayer, ExecuteError> {
    self.count.fetch_add(1, Ordering::SeqCst);
    self.inner.build_stage(job).await
  }
}

/// An isolated project with its own home (stages, layers, locks).
pub struct TestProject {
  pub temp: TempDir,
}

impl TestProject {
  pub fn new(config: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let project = Self { temp };
    project.write_file("conveyor.yaml", config);
    project
  }

  pub fn project_dir(&self) -> PathBuf {
    let dir = self.temp.path().join("project");
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  pub fn home(&self) -> PathBuf {
    self.temp.path().join("home")
  }

  pub fn layers_dir(&self) -> PathBuf {
    self.home().join("layers")
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.project_dir().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn config(&self) -> ProjectConfig {
    load_config(&self.project_dir()).unwrap()
  }

  pub fn executor(&self) -> Arc<CountingExecutor> {
    Arc::new(CountingExecutor::new(&self.layers_dir()))
  }

  pub fn storage(&self) -> LocalStagesStorage {
    let config = self.config();
    LocalStagesStorage::new(&self.home().join("stages"), &config.project)
  }

  /// A conveyor as a separate process would set one up: its own lock
  /// service and staging directory over the shared home.
  pub fn conveyor(&self, executor: Arc<CountingExecutor>) -> Conveyor {
    let staging = self
      .temp
      .path()
      .join(format!("staging-{}", NEXT_STAGING.fetch_add(1, Ordering::SeqCst)));
    let mut options = ConveyorOptions::new(self.project_dir(), staging);
    options.parallelism = 2;
    options.lock_timeout = Duration::from_secs(30);
    options.retry = RetryPolicy::none();

    Conveyor::new(
      self.config(),
      Backends {
        storage: Arc::new(self.storage()),
        locks: Arc::new(
          FileLockService::new(self.home().join("locks"), "conveyor test").with_poll_interval(Duration::from_millis(10)),
        ),
        executor,
      },
      options,
    )
  }
}
