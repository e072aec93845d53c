//! The conveyor: builds images stage by stage through the shared stages
//! storage and publishes the results.
//!
//! A stage is executed only when its signature is missing from the stages
//! storage. Builders cooperating on the same storage serialize on a per-stage
//! lock, so every signature is built at most once and everyone ends up with the
//! same layer.

mod build;
mod flush;
mod plan;
mod publish;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProjectConfig;
use crate::executor::StageExecutor;
use crate::lock::LockService;
use crate::registry::RetryPolicy;
use crate::storage::StagesStorage;

pub use plan::{BuildPlan, plan};
pub use publish::PublishOptions;
pub use types::*;

/// Default lock wait: long enough to sit out a slow stage built by someone else.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// The pluggable collaborators of a conveyor.
#[derive(Clone)]
pub struct Backends {
  pub storage: Arc<dyn StagesStorage>,
  pub locks: Arc<dyn LockService>,
  pub executor: Arc<dyn StageExecutor>,
}

#[derive(Debug, Clone)]
pub struct ConveyorOptions {
  pub project_dir: PathBuf,
  /// Session scratch space handed to executors.
  pub staging_dir: PathBuf,
  /// Maximum stages executing at once across all images.
  pub parallelism: usize,
  pub lock_timeout: Duration,
  /// Applied to registry pushes and lookups while publishing.
  pub retry: RetryPolicy,
  pub ssh_auth_sock: Option<PathBuf>,
}

impl ConveyorOptions {
  pub fn new(project_dir: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
    ConveyorOptions {
      project_dir: project_dir.into(),
      staging_dir: staging_dir.into(),
      parallelism: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
      lock_timeout: DEFAULT_LOCK_TIMEOUT,
      retry: RetryPolicy::default(),
      ssh_auth_sock: None,
    }
  }
}

/// Builds and publishes the images of one project.
///
/// Cheap to clone; clones share the same backends.
#[derive(Clone)]
pub struct Conveyor {
  config: Arc<ProjectConfig>,
  backends: Backends,
  options: Arc<ConveyorOptions>,
}

impl Conveyor {
  pub fn new(config: ProjectConfig, backends: Backends, options: ConveyorOptions) -> Self {
    Conveyor {
      config: Arc::new(config),
      backends,
      options: Arc::new(options),
    }
  }

  pub fn config(&self) -> &ProjectConfig {
    &self.config
  }

  pub fn project(&self) -> &str {
    &self.config.project
  }

  pub fn options(&self) -> &ConveyorOptions {
    &self.options
  }

  pub fn storage(&self) -> &Arc<dyn StagesStorage> {
    &self.backends.storage
  }

  /// Build `images` (every image when empty) and publish those that built.
  ///
  /// Tag options are validated before anything is built.
  pub async fn build_and_publish(
    &self,
    images: &[String],
    publish: &PublishOptions,
  ) -> Result<(BuildReport, PublishReport), ConveyorError> {
    publish.tag_plan().map_err(PublishError::from)?;

    let build = self.build(images).await?;

    let requested: Vec<String> = if images.is_empty() {
      self.config.image_names()
    } else {
      images.to_vec()
    };
    let built: Vec<String> = requested
      .into_iter()
      .filter(|name| build.image(name).is_some_and(ImageBuild::is_success))
      .collect();

    let published = if built.is_empty() {
      PublishReport::default()
    } else {
      self.publish_images(&built, publish).await?
    };
    Ok((build, published))
  }
}
