//! Stages storage backed by an image registry: each stage is the tag
//! `<stages-repo>:<signature>`, its metadata carried in image labels.
//!
//! Registries have no compare-and-swap, so a put reads, compares, pushes and
//! reads back. A racing writer with a different layer is detected on the read
//! back and reported as an integrity violation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{PutOutcome, StageEntry, StagesStorage, StorageError, check_same_layer};
use crate::config::StageName;
use crate::consts::{LABEL_CREATED_AT, LABEL_IMAGE, LABEL_SIZE, LABEL_STAGE};
use crate::registry::{Labels, Registry, RemoteImage, RetryPolicy};
use crate::signature::Signature;
use crate::types::ImageRef;

pub struct RegistryStagesStorage {
  registry: Arc<dyn Registry>,
  repository: String,
  retry: RetryPolicy,
}

impl RegistryStagesStorage {
  pub fn new(registry: Arc<dyn Registry>, repository: impl Into<String>, retry: RetryPolicy) -> Self {
    RegistryStagesStorage {
      registry,
      repository: repository.into(),
      retry,
    }
  }

  fn target(&self, signature: &Signature) -> ImageRef {
    ImageRef::new(&self.repository, signature.as_str())
  }

  async fn resolve(&self, target: &ImageRef) -> Result<Option<RemoteImage>, StorageError> {
    let remote = self
      .retry
      .run("resolve stage", || self.registry.resolve(target))
      .await?;
    Ok(remote)
  }
}

fn entry_labels(entry: &StageEntry) -> Labels {
  let mut labels = Labels::new();
  labels.insert(LABEL_IMAGE.to_string(), entry.image.clone());
  labels.insert(LABEL_STAGE.to_string(), entry.stage.as_str().to_string());
  labels.insert(LABEL_CREATED_AT.to_string(), entry.created_at.to_string());
  if let Some(size) = entry.size {
    labels.insert(LABEL_SIZE.to_string(), size.to_string());
  }
  labels
}

fn entry_from_remote(remote: RemoteImage) -> Result<StageEntry, StorageError> {
  let corrupt = |message: &str| StorageError::Corrupt {
    location: remote.reference.to_string(),
    message: message.to_string(),
  };

  let stage = remote
    .labels
    .get(LABEL_STAGE)
    .and_then(|s| StageName::parse(s))
    .ok_or_else(|| corrupt("missing or invalid stage label"))?;
  let image = remote
    .labels
    .get(LABEL_IMAGE)
    .cloned()
    .ok_or_else(|| corrupt("missing image label"))?;
  let created_at = remote
    .labels
    .get(LABEL_CREATED_AT)
    .and_then(|s| s.parse().ok())
    .ok_or_else(|| corrupt("missing or invalid created-at label"))?;
  let size = remote.labels.get(LABEL_SIZE).and_then(|s| s.parse().ok());

  Ok(StageEntry {
    layer: remote.layer,
    created_at,
    size,
    image,
    stage,
  })
}

#[async_trait]
impl StagesStorage for RegistryStagesStorage {
  fn describe(&self) -> String {
    self.repository.clone()
  }

  async fn get(&self, signature: &Signature) -> Result<Option<StageEntry>, StorageError> {
    self
      .resolve(&self.target(signature))
      .await?
      .map(entry_from_remote)
      .transpose()
  }

  async fn put(&self, signature: &Signature, entry: &StageEntry) -> Result<PutOutcome, StorageError> {
    let target = self.target(signature);

    if let Some(remote) = self.resolve(&target).await? {
      check_same_layer(signature, &entry_from_remote(remote)?, entry)?;
      return Ok(PutOutcome::AlreadyPresent);
    }

    let labels = entry_labels(entry);
    self
      .retry
      .run("push stage", || self.registry.push(&entry.layer, &target, &labels))
      .await?;
    debug!(signature = %signature, target = %target, "pushed stage");

    match self.resolve(&target).await? {
      Some(remote) => {
        check_same_layer(signature, &entry_from_remote(remote)?, entry)?;
        Ok(PutOutcome::Inserted)
      }
      None => Err(StorageError::Corrupt {
        location: target.to_string(),
        message: "pushed stage is not visible in the registry".to_string(),
      }),
    }
  }

  async fn list(&self) -> Result<Vec<Signature>, StorageError> {
    let tags = self
      .retry
      .run("list stages", || self.registry.list_tags(&self.repository))
      .await?;
    let mut signatures: Vec<Signature> = tags.into_iter().map(Signature).collect();
    signatures.sort();
    Ok(signatures)
  }

  async fn remove(&self, signature: &Signature) -> Result<bool, StorageError> {
    let target = self.target(signature);
    if self.resolve(&target).await?.is_none() {
      return Ok(false);
    }
    self
      .retry
      .run("delete stage", || self.registry.delete(&target))
      .await?;
    Ok(true)
  }
}
