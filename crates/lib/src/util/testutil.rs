//! Test doubles shared by unit tests.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ProjectConfig, StageName, parse_config};
use crate::conveyor::{Backends, Conveyor, ConveyorOptions};
use crate::executor::{BuiltLayer, ExecuteError, StageBase, StageExecutor, StageJob};
use crate::lock::MemoryLockService;
use crate::registry::RetryPolicy;
use crate::storage::{LocalStagesStorage, StagesStorage};
use crate::types::LayerRef;

pub fn config(yaml: &str) -> ProjectConfig {
  parse_config(yaml, Path::new("conveyor.yaml")).unwrap()
}

/// Executor that records what it was asked to build and derives the layer
/// from the job, so identical jobs yield identical layers.
#[derive(Default)]
pub struct FakeExecutor {
  jobs: Mutex<Vec<(String, StageName, StageBase)>>,
  failing: HashSet<(String, StageName)>,
  delay: Option<Duration>,
}

impl FakeExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing(mut self, image: &str, stage: StageName) -> Self {
    self.failing.insert((image.to_string(), stage));
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn builds(&self) -> Vec<(String, StageName, StageBase)> {
    self.jobs.lock().unwrap().clone()
  }

  pub fn build_count(&self) -> usize {
    self.jobs.lock().unwrap().len()
  }
}

#[async_trait]
impl StageExecutor for FakeExecutor {
  fn name(&self) -> &'static str {
    "fake"
  }

  async fn build_stage(&self, job: &StageJob) -> Result<BuiltLayer, ExecuteError> {
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self
      .jobs
      .lock()
      .unwrap()
      .push((job.image.clone(), job.stage, job.base.clone()));
    if self.failing.contains(&(job.image.clone(), job.stage)) {
      return Err(ExecuteError::InstructionFailed {
        instruction: job.instructions.join("\n"),
        code: Some(1),
        stderr: "boom".to_string(),
      });
    }
    Ok(BuiltLayer {
      layer: LayerRef(format!("layer:{}", job.signature.short())),
      size: Some(1),
    })
  }
}

/// A conveyor over local storage and in-memory locks rooted at `root`.
pub fn conveyor(
  root: &Path,
  config: ProjectConfig,
  storage: Arc<dyn StagesStorage>,
  executor: Arc<dyn StageExecutor>,
) -> Conveyor {
  let mut options = ConveyorOptions::new(root.join("project"), root.join("staging"));
  options.parallelism = 4;
  options.lock_timeout = Duration::from_secs(5);
  options.retry = RetryPolicy::none();
  Conveyor::new(
    config,
    Backends {
      storage,
      locks: Arc::new(MemoryLockService::new()),
      executor,
    },
    options,
  )
}

pub fn local_storage(root: &Path, project: &str) -> Arc<dyn StagesStorage> {
  Arc::new(LocalStagesStorage::new(&root.join("stages"), project))
}

/// Labels as a sorted map, for comparisons.
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
  pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
