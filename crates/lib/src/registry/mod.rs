//! Image registry boundary.
//!
//! The conveyor publishes finished layers and, with registry-backed stages
//! storage, caches stage layers through a [`Registry`]. Authentication is
//! whatever the backend already has configured.

mod docker;
mod local;
mod retry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DIR_REGISTRY_PREFIX;
use crate::types::{ImageRef, LayerRef};

pub use docker::DockerRegistry;
pub use local::LocalRegistry;
pub use retry::{RetryPolicy, Retryable};

/// Image labels, sorted by key.
pub type Labels = BTreeMap<String, String>;

/// What a registry knows about a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteImage {
  pub reference: ImageRef,
  /// The layer that was pushed under this tag.
  pub layer: LayerRef,
  pub labels: Labels,
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("authentication failed for {target}: {message}")]
  Auth { target: String, message: String },

  #[error("not found: {0}")]
  NotFound(String),

  #[error("transient registry failure for {target}: {message}")]
  Transient { target: String, message: String },

  #[error("registry error for {target}: {message}")]
  Other { target: String, message: String },

  #[error("the {registry} registry backend cannot {operation} {target}")]
  Unsupported {
    registry: &'static str,
    operation: &'static str,
    target: String,
  },
}

impl RegistryError {
  /// Only transient failures are worth another attempt.
  pub fn is_retryable(&self) -> bool {
    matches!(self, RegistryError::Transient { .. })
  }
}

impl Retryable for RegistryError {
  fn is_retryable(&self) -> bool {
    RegistryError::is_retryable(self)
  }
}

#[async_trait]
pub trait Registry: Send + Sync {
  /// Short backend name for logs.
  fn name(&self) -> &'static str;

  /// Publish `layer` as `target`, replacing whatever the tag pointed at.
  async fn push(&self, layer: &LayerRef, target: &ImageRef, labels: &Labels) -> Result<(), RegistryError>;

  /// Look up a tag. `Ok(None)` when the tag does not exist.
  async fn resolve(&self, target: &ImageRef) -> Result<Option<RemoteImage>, RegistryError>;

  /// Tags currently present in `repository`. Backends that cannot see the
  /// remote tag list return [`RegistryError::Unsupported`].
  async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError>;

  /// Remove a tag. Removing a missing tag is not an error. Backends that
  /// cannot remove remote tags return [`RegistryError::Unsupported`].
  async fn delete(&self, target: &ImageRef) -> Result<(), RegistryError>;
}

/// Pick the registry backend for a repository.
///
/// `dir:<path>` repositories use the directory registry; everything else goes
/// through the docker CLI. `layers` lets the directory registry refuse layers
/// that were never built.
pub fn registry_for(repository: &str, layers: Option<PathBuf>) -> Arc<dyn Registry> {
  if repository.starts_with(DIR_REGISTRY_PREFIX) {
    let registry = match layers {
      Some(layers) => LocalRegistry::with_layers(layers),
      None => LocalRegistry::new(),
    };
    Arc::new(registry)
  } else {
    Arc::new(DockerRegistry::new())
  }
}
