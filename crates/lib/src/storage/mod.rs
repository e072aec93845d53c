//! Stages storage: the shared cache mapping stage signatures to built layers.
//!
//! A signature maps to at most one layer, ever. Putting the same layer twice is
//! a no-op; putting a different layer under an existing signature is an
//! integrity violation and is never silently resolved.

mod local;
mod registry;

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StageName;
use crate::registry::{RegistryError, Retryable};
use crate::signature::Signature;
use crate::types::LayerRef;

pub use local::LocalStagesStorage;
pub use registry::RegistryStagesStorage;

/// A cached stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
  pub layer: LayerRef,
  /// Unix seconds.
  pub created_at: u64,
  /// Layer size in bytes, when the executor reports one.
  pub size: Option<u64>,
  /// Image and stage that first produced the layer.
  pub image: String,
  pub stage: StageName,
}

/// Result of a successful put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
  Inserted,
  /// An entry with the same layer was already present.
  AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("cache integrity violation for stage {signature}: stored layer {existing}, attempted {attempted}")]
  Integrity {
    signature: Signature,
    existing: LayerRef,
    attempted: LayerRef,
  },

  #[error("stages storage I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("corrupt stages storage entry {location}: {message}")]
  Corrupt { location: String, message: String },

  #[error(transparent)]
  Registry(#[from] RegistryError),
}

impl Retryable for StorageError {
  fn is_retryable(&self) -> bool {
    match self {
      StorageError::Registry(e) => e.is_retryable(),
      _ => false,
    }
  }
}

#[async_trait]
pub trait StagesStorage: Send + Sync {
  /// Human-readable location, for logs and reports.
  fn describe(&self) -> String;

  async fn exists(&self, signature: &Signature) -> Result<bool, StorageError> {
    Ok(self.get(signature).await?.is_some())
  }

  async fn get(&self, signature: &Signature) -> Result<Option<StageEntry>, StorageError>;

  /// Atomically insert `entry` unless the signature is already present.
  async fn put(&self, signature: &Signature, entry: &StageEntry) -> Result<PutOutcome, StorageError>;

  /// Signatures of every stored entry, sorted.
  async fn list(&self) -> Result<Vec<Signature>, StorageError>;

  /// Remove an entry. Returns `false` when it did not exist.
  async fn remove(&self, signature: &Signature) -> Result<bool, StorageError>;
}

fn check_same_layer(signature: &Signature, existing: &StageEntry, attempted: &StageEntry) -> Result<(), StorageError> {
  if existing.layer == attempted.layer {
    Ok(())
  } else {
    Err(StorageError::Integrity {
      signature: signature.clone(),
      existing: existing.layer.clone(),
      attempted: attempted.layer.clone(),
    })
  }
}
