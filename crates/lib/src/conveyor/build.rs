//! Stage-by-stage image builds through the stages storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::types::{BuildError, BuildReport, CacheStatus, ConveyorError, ImageBuild, StageFailure, StageReport};
use super::{Conveyor, plan};
use crate::config::{BaseImage, ImageDef, StageDef, StageName};
use crate::executor::{StageBase, StageJob};
use crate::lock::stage_lock_name;
use crate::signature::{self, Signature};
use crate::storage::{StageEntry, StorageError};
use crate::types::LayerRef;

/// Final signature and layer of a built image, handed to its children.
#[derive(Debug, Clone)]
struct BuiltImage {
  signature: Signature,
  layer: LayerRef,
}

/// How a stage ended, short of success.
enum StageError {
  /// Stop this image; other images carry on.
  Failed(StageFailure),
  /// Stop everything.
  Fatal(ConveyorError),
}

impl Conveyor {
  /// Build `images` (every image when empty) and their `fromImage` ancestors.
  ///
  /// Images are built in dependency waves; a wave's images run concurrently,
  /// bounded by the parallelism setting. A failed image fails only itself and
  /// the images built from it. A cache integrity violation aborts the whole
  /// build.
  pub async fn build(&self, images: &[String]) -> Result<BuildReport, ConveyorError> {
    let plan = plan(&self.config, images)?;
    let started = Instant::now();
    info!(
      project = %self.config.project,
      images = plan.len(),
      waves = plan.waves.len(),
      storage = %self.backends.storage.describe(),
      executor = self.backends.executor.name(),
      "starting build"
    );

    let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
    let mut built: HashMap<String, BuiltImage> = HashMap::new();
    let mut results: HashMap<String, ImageBuild> = HashMap::new();

    for (wave_idx, wave) in plan.waves.iter().enumerate() {
      debug!(wave = wave_idx, images = ?wave, "starting wave");
      let mut join_set = JoinSet::new();

      for name in wave {
        let Some(image) = self.config.image(name) else {
          continue;
        };

        let parent = match image.parent_image() {
          Some(parent_name) => match built.get(parent_name) {
            Some(parent) => Some(parent.clone()),
            None => {
              warn!(image = %name, parent = %parent_name, "skipping image: parent was not built");
              results.insert(
                name.clone(),
                ImageBuild {
                  image: name.clone(),
                  stages: Vec::new(),
                  result: Err(BuildError {
                    image: name.clone(),
                    stage: StageName::From,
                    signature: None,
                    source: StageFailure::ParentFailed(parent_name.to_string()),
                  }),
                },
              );
              continue;
            }
          },
          None => None,
        };

        let conveyor = self.clone();
        let image = image.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move { conveyor.build_image(image, parent, semaphore).await });
      }

      while let Some(joined) = join_set.join_next().await {
        match joined {
          Ok(Ok((image_build, finished))) => {
            if let Some(finished) = finished {
              built.insert(image_build.image.clone(), finished);
            }
            results.insert(image_build.image.clone(), image_build);
          }
          Ok(Err(fatal)) => {
            error!(error = %fatal, "aborting build");
            join_set.shutdown().await;
            return Err(fatal);
          }
          Err(e) => {
            error!(error = %e, "image build task panicked");
          }
        }
      }
    }

    let report = BuildReport {
      images: plan.order().filter_map(|name| results.remove(name)).collect(),
    };
    info!(
      built = report.images.iter().filter(|i| i.is_success()).count(),
      failed = report.failures().count(),
      elapsed = ?started.elapsed(),
      "build complete"
    );
    Ok(report)
  }

  async fn build_image(
    self,
    image: ImageDef,
    parent: Option<BuiltImage>,
    semaphore: Arc<Semaphore>,
  ) -> Result<(ImageBuild, Option<BuiltImage>), ConveyorError> {
    let name = image.name.clone();

    let signatures = {
      let project_dir = self.options.project_dir.clone();
      let image = image.clone();
      let parent_signature = parent.as_ref().map(|p| p.signature.clone());
      tokio::task::spawn_blocking(move || {
        signature::image_signatures(&project_dir, &image, parent_signature.as_ref())
      })
      .await
    };
    let signatures = match signatures {
      Ok(Ok(signatures)) => signatures,
      Ok(Err(e)) => return Ok((failed(&name, Vec::new(), StageName::From, None, e.into()), None)),
      Err(e) => {
        let failure = StageFailure::Execute(std::io::Error::other(e).into());
        return Ok((failed(&name, Vec::new(), StageName::From, None, failure), None));
      }
    };

    let mut stages: Vec<StageReport> = Vec::with_capacity(signatures.len());
    let mut previous: Option<LayerRef> = parent.as_ref().map(|p| p.layer.clone());

    for (stage, (stage_name, signature)) in image.stages.iter().zip(signatures) {
      let base = match (&previous, &image.base) {
        (Some(layer), _) => StageBase::Layer(layer.clone()),
        (None, BaseImage::External(reference)) => StageBase::External(reference.clone()),
        (None, BaseImage::Image(parent_name)) => {
          let failure = StageFailure::ParentFailed(parent_name.clone());
          return Ok((failed(&name, stages, stage_name, Some(signature), failure), None));
        }
      };

      match self.build_stage(&image, stage, &signature, base, &semaphore).await {
        Ok(report) => {
          previous = report.layer.clone();
          stages.push(report);
        }
        Err(StageError::Fatal(e)) => return Err(e),
        Err(StageError::Failed(failure)) => {
          warn!(image = %name, stage = %stage_name, error = %failure, "stage failed");
          stages.push(StageReport {
            stage: stage_name,
            signature: signature.clone(),
            status: CacheStatus::Building,
            layer: None,
          });
          return Ok((failed(&name, stages, stage_name, Some(signature), failure), None));
        }
      }
    }

    let last = stages.last().and_then(|s| s.layer.clone().map(|layer| (s.signature.clone(), layer)));
    let Some((signature, layer)) = last else {
      let failure = StageFailure::Execute(std::io::Error::other("image has no stages").into());
      return Ok((failed(&name, stages, StageName::From, None, failure), None));
    };

    info!(
      image = %name,
      signature = %signature.short(),
      layer = %layer,
      hits = stages.iter().filter(|s| s.status == CacheStatus::Hit).count(),
      built = stages.iter().filter(|s| s.status == CacheStatus::Miss).count(),
      "image ready"
    );
    let image_build = ImageBuild {
      image: name,
      stages,
      result: Ok(layer.clone()),
    };
    Ok((image_build, Some(BuiltImage { signature, layer })))
  }

  /// Lock, look up, and when missing execute and store one stage.
  async fn build_stage(
    &self,
    image: &ImageDef,
    stage: &StageDef,
    signature: &Signature,
    base: StageBase,
    semaphore: &Semaphore,
  ) -> Result<StageReport, StageError> {
    let storage = &self.backends.storage;
    let lock_name = stage_lock_name(&self.config.project, signature);

    let lock_started = Instant::now();
    let token = self
      .backends
      .locks
      .acquire(&lock_name, self.options.lock_timeout)
      .await
      .map_err(|e| StageError::Failed(e.into()))?;

    if let Some(entry) = storage
      .get(signature)
      .await
      .map_err(|e| StageError::Failed(StageFailure::Storage(e)))?
    {
      debug!(
        image = %image.name,
        stage = %stage.name,
        signature = %signature.short(),
        layer = %entry.layer,
        waited = ?lock_started.elapsed(),
        "stage cache hit"
      );
      drop(token);
      return Ok(StageReport {
        stage: stage.name,
        signature: signature.clone(),
        status: CacheStatus::Hit,
        layer: Some(entry.layer),
      });
    }

    let job = StageJob {
      project: self.config.project.clone(),
      image: image.name.clone(),
      stage: stage.name,
      signature: signature.clone(),
      base,
      instructions: stage.instructions.clone(),
      project_dir: self.options.project_dir.clone(),
      staging_dir: self.options.staging_dir.clone(),
      ssh_auth_sock: self.options.ssh_auth_sock.clone(),
    };

    let built = {
      let _permit = semaphore
        .acquire()
        .await
        .map_err(|e| StageError::Failed(StageFailure::Execute(std::io::Error::other(e).into())))?;
      self
        .backends
        .executor
        .build_stage(&job)
        .await
        .map_err(|e| StageError::Failed(e.into()))?
    };

    let entry = StageEntry {
      layer: built.layer.clone(),
      created_at: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      size: built.size,
      image: image.name.clone(),
      stage: stage.name,
    };

    match storage.put(signature, &entry).await {
      Ok(outcome) => {
        debug!(signature = %signature.short(), outcome = ?outcome, "stored stage");
      }
      Err(e @ StorageError::Integrity { .. }) => {
        return Err(StageError::Fatal(ConveyorError::CacheIntegrity {
          image: image.name.clone(),
          stage: stage.name,
          source: e,
        }));
      }
      Err(e) => return Err(StageError::Failed(StageFailure::Storage(e))),
    }
    drop(token);

    info!(
      image = %image.name,
      stage = %stage.name,
      signature = %signature.short(),
      layer = %built.layer,
      "stage stored"
    );
    Ok(StageReport {
      stage: stage.name,
      signature: signature.clone(),
      status: CacheStatus::Miss,
      layer: Some(built.layer),
    })
  }
}

fn failed(
  image: &str,
  stages: Vec<StageReport>,
  stage: StageName,
  signature: Option<Signature>,
  source: StageFailure,
) -> ImageBuild {
  ImageBuild {
    image: image.to_string(),
    stages,
    result: Err(BuildError {
      image: image.to_string(),
      stage,
      signature,
      source,
    }),
  }
}
