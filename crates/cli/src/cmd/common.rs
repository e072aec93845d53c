//! Options shared by every command and the wiring of library backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::debug;

use conveyor_lib::config::{ProjectConfig, load_config};
use conveyor_lib::conveyor::{Backends, Conveyor, ConveyorOptions, DEFAULT_LOCK_TIMEOUT};
use conveyor_lib::executor::{DirExecutor, DockerExecutor, StageExecutor};
use conveyor_lib::lock::FileLockService;
use conveyor_lib::paths;
use conveyor_lib::registry::{RetryPolicy, registry_for};
use conveyor_lib::session::{Session, SessionOptions};
use conveyor_lib::storage::{LocalStagesStorage, RegistryStagesStorage, StagesStorage};

use crate::output::OutputFormat;

/// Stages storage value selecting the local directory storage.
pub const LOCAL_STAGES_STORAGE: &str = ":local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Backend {
  /// Root filesystem directories under the home dir, instructions run by /bin/sh.
  #[default]
  Dir,
  /// `docker run` + `docker commit`.
  Docker,
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
  /// Project directory containing conveyor.yaml
  #[arg(long, global = true, env = "CONVEYOR_DIR", default_value = ".")]
  pub dir: PathBuf,

  /// Home directory for stages, layers and locks
  #[arg(long, global = true, env = "CONVEYOR_HOME")]
  pub home_dir: Option<PathBuf>,

  /// Base directory for per-invocation temporary directories
  #[arg(long, global = true, env = "CONVEYOR_TMP_DIR")]
  pub tmp_dir: Option<PathBuf>,

  /// Stages storage: `:local` or a registry repository
  #[arg(long, global = true, env = "CONVEYOR_STAGES_STORAGE", default_value = LOCAL_STAGES_STORAGE)]
  pub stages_storage: String,

  /// Stage executor backend
  #[arg(long, global = true, env = "CONVEYOR_BACKEND", value_enum, default_value_t = Backend::Dir)]
  pub backend: Backend,

  /// SSH private key made available to stage instructions (repeatable)
  #[arg(long = "ssh-key", global = true, env = "CONVEYOR_SSH_KEY", value_delimiter = ',')]
  pub ssh_keys: Vec<PathBuf>,

  /// Maximum number of stages executing at once
  #[arg(long, global = true, env = "CONVEYOR_PARALLELISM")]
  pub parallelism: Option<usize>,

  /// How long to wait for a lock held by another builder (e.g. `10m`)
  #[arg(long, global = true, env = "CONVEYOR_LOCK_TIMEOUT", value_parser = humantime::parse_duration)]
  pub lock_timeout: Option<Duration>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  pub output: OutputFormat,

  /// Increase log verbosity (-v debug, -vv trace)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  pub verbose: u8,
}

impl GlobalArgs {
  pub fn home(&self) -> PathBuf {
    self.home_dir.clone().unwrap_or_else(paths::home_dir)
  }

  pub fn tmp_base(&self) -> PathBuf {
    self.tmp_dir.clone().unwrap_or_else(paths::tmp_base_dir)
  }

  pub fn config(&self) -> Result<ProjectConfig> {
    load_config(&self.dir).context("Failed to load project configuration")
  }

  fn layers_for_registry(&self) -> Option<PathBuf> {
    match self.backend {
      Backend::Dir => Some(paths::layers_dir(&self.home())),
      Backend::Docker => None,
    }
  }

  pub fn storage(&self, project: &str) -> Arc<dyn StagesStorage> {
    if self.stages_storage == LOCAL_STAGES_STORAGE {
      Arc::new(LocalStagesStorage::new(&paths::stages_dir(&self.home()), project))
    } else {
      let registry = registry_for(&self.stages_storage, self.layers_for_registry());
      Arc::new(RegistryStagesStorage::new(
        registry,
        &self.stages_storage,
        RetryPolicy::default(),
      ))
    }
  }

  pub fn images_registry(&self, repository: &str) -> Arc<dyn conveyor_lib::registry::Registry> {
    registry_for(repository, self.layers_for_registry())
  }

  fn executor(&self) -> Arc<dyn StageExecutor> {
    match self.backend {
      Backend::Dir => Arc::new(DirExecutor::new(paths::layers_dir(&self.home()))),
      Backend::Docker => Arc::new(DockerExecutor::new()),
    }
  }
}

/// Everything a build or publish needs for one invocation.
pub struct Workspace {
  pub conveyor: Conveyor,
  session: Session,
}

impl Workspace {
  pub async fn open(global: &GlobalArgs, command: &str) -> Result<Self> {
    let config = global.config()?;
    let session = Session::open(SessionOptions {
      project_dir: global.dir.clone(),
      tmp_base: global.tmp_base(),
      ssh_keys: global.ssh_keys.clone(),
      sweep_abandoned: true,
    })
    .await
    .context("Failed to start session")?;

    let mut options = ConveyorOptions::new(session.project_dir(), session.staging_dir());
    if let Some(parallelism) = global.parallelism {
      options.parallelism = parallelism;
    }
    options.lock_timeout = global.lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT);
    options.ssh_auth_sock = session.ssh_auth_sock().map(|p| p.to_path_buf());

    let backends = Backends {
      storage: global.storage(&config.project),
      locks: Arc::new(FileLockService::new(
        paths::locks_dir(&global.home()),
        format!("conveyor {}", command),
      )),
      executor: global.executor(),
    };
    debug!(
      project = %config.project,
      storage = %backends.storage.describe(),
      backend = ?global.backend,
      "workspace ready"
    );

    Ok(Workspace {
      conveyor: Conveyor::new(config, backends, options),
      session,
    })
  }

  pub async fn close(self) {
    self.session.close().await;
  }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
