//! Reports and errors produced by the conveyor.

use serde::Serialize;
use thiserror::Error;

use crate::config::StageName;
use crate::executor::ExecuteError;
use crate::lock::LockError;
use crate::registry::RegistryError;
use crate::signature::{Signature, SignatureError};
use crate::storage::StorageError;
use crate::tag::{ResolvedTag, TagError};
use crate::types::{ImageRef, LayerRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStatus {
  /// Found in the stages storage; nothing was executed.
  Hit,
  /// Executed and stored by this invocation.
  Miss,
  /// Execution started but did not produce a stored layer.
  Building,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
  pub stage: StageName,
  pub signature: Signature,
  pub status: CacheStatus,
  pub layer: Option<LayerRef>,
}

/// Why a stage could not complete.
#[derive(Debug, Error)]
pub enum StageFailure {
  #[error(transparent)]
  Execute(#[from] ExecuteError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Storage(StorageError),

  #[error(transparent)]
  Signature(#[from] SignatureError),

  #[error("parent image {0} was not built")]
  ParentFailed(String),
}

/// A failed image build, with the stage it stopped at.
#[derive(Debug, Error)]
#[error("image {image}, stage {stage}{}: {source}", .signature.as_ref().map(|s| format!(" ({})", s.short())).unwrap_or_default())]
pub struct BuildError {
  pub image: String,
  pub stage: StageName,
  pub signature: Option<Signature>,
  #[source]
  pub source: StageFailure,
}

impl BuildError {
  /// Lock timeouts may succeed on another attempt; nothing else will.
  pub fn is_retryable(&self) -> bool {
    matches!(&self.source, StageFailure::Lock(e) if e.is_retryable())
  }

  pub fn is_skip(&self) -> bool {
    matches!(self.source, StageFailure::ParentFailed(_))
  }
}

/// Outcome of building one image.
#[derive(Debug)]
pub struct ImageBuild {
  pub image: String,
  /// Stages processed, in order. Stages after a failure are absent.
  pub stages: Vec<StageReport>,
  /// Final layer, or why the image was not built.
  pub result: Result<LayerRef, BuildError>,
}

impl ImageBuild {
  pub fn is_success(&self) -> bool {
    self.result.is_ok()
  }

  pub fn count(&self, status: CacheStatus) -> usize {
    self.stages.iter().filter(|s| s.status == status).count()
  }
}

/// Outcome of a build, one entry per image in build order.
#[derive(Debug, Default)]
pub struct BuildReport {
  pub images: Vec<ImageBuild>,
}

impl BuildReport {
  pub fn image(&self, name: &str) -> Option<&ImageBuild> {
    self.images.iter().find(|i| i.image == name)
  }

  pub fn is_success(&self) -> bool {
    self.images.iter().all(ImageBuild::is_success)
  }

  pub fn failures(&self) -> impl Iterator<Item = &BuildError> {
    self.images.iter().filter_map(|i| i.result.as_ref().err())
  }

  pub fn succeeded(&self) -> Vec<String> {
    self
      .images
      .iter()
      .filter(|i| i.is_success())
      .map(|i| i.image.clone())
      .collect()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushStatus {
  Pushed,
  /// The tag already pointed at the same layer with the same labels.
  Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedTag {
  pub tag: ResolvedTag,
  pub target: ImageRef,
  pub status: PushStatus,
}

#[derive(Debug, Error)]
pub enum PublishError {
  #[error("specified images are not defined: {}", .0.join(", "))]
  UnknownImages(Vec<String>),

  #[error(transparent)]
  Tag(#[from] TagError),

  #[error("image {image} is not built (stage {signature} is missing from the stages storage)")]
  NotBuilt { image: String, signature: Signature },

  #[error("image {image}: {source}")]
  Signature {
    image: String,
    #[source]
    source: SignatureError,
  },

  #[error("image {image}: {source}")]
  Storage {
    image: String,
    #[source]
    source: StorageError,
  },

  #[error("image {image}: push to {target} failed: {source}")]
  Registry {
    image: String,
    target: ImageRef,
    #[source]
    source: RegistryError,
  },
}

/// Outcome of publishing one image.
#[derive(Debug)]
pub struct ImagePublish {
  pub image: String,
  pub signature: Option<Signature>,
  /// Tags handled before any failure.
  pub tags: Vec<PublishedTag>,
  pub error: Option<PublishError>,
}

#[derive(Debug, Default)]
pub struct PublishReport {
  pub images: Vec<ImagePublish>,
}

impl PublishReport {
  pub fn image(&self, name: &str) -> Option<&ImagePublish> {
    self.images.iter().find(|i| i.image == name)
  }

  pub fn is_success(&self) -> bool {
    self.images.iter().all(|i| i.error.is_none())
  }
}

#[derive(Debug, Default, Serialize)]
pub struct FlushReport {
  pub storage: String,
  pub removed: Vec<Signature>,
}

#[derive(Debug, Error)]
pub enum ConveyorError {
  #[error("specified images are not defined: {}", .0.join(", "))]
  UnknownImages(Vec<String>),

  #[error("fromImage references form a cycle: {}", .0.join(", "))]
  Cycle(Vec<String>),

  #[error("cache integrity violation while building image {image}, stage {stage}: {source}")]
  CacheIntegrity {
    image: String,
    stage: StageName,
    #[source]
    source: StorageError,
  },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Publish(#[from] PublishError),
}
