//! Directory-backed registry.
//!
//! A repository `dir:/srv/registry/web` maps to the directory
//! `/srv/registry/web`; each tag is a manifest file `<tag>.json` in it. Useful
//! for air-gapped CI runners and for tests.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Labels, Registry, RegistryError, RemoteImage};
use crate::consts::DIR_REGISTRY_PREFIX;
use crate::types::{ImageRef, LayerRef};
use crate::util::fs::atomic_write;

#[derive(Debug, Serialize, Deserialize)]
struct TagManifest {
  layer: LayerRef,
  labels: Labels,
  pushed_at: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LocalRegistry {
  layers: Option<PathBuf>,
}

impl LocalRegistry {
  pub fn new() -> Self {
    LocalRegistry { layers: None }
  }

  /// Refuse pushes of `sha256:<hash>` layers that have no directory under `layers`.
  pub fn with_layers(layers: PathBuf) -> Self {
    LocalRegistry { layers: Some(layers) }
  }

  fn repository_dir(repository: &str) -> Result<PathBuf, RegistryError> {
    repository
      .strip_prefix(DIR_REGISTRY_PREFIX)
      .filter(|path| !path.is_empty())
      .map(PathBuf::from)
      .ok_or_else(|| RegistryError::Other {
        target: repository.to_string(),
        message: format!("directory registry repositories must start with `{}`", DIR_REGISTRY_PREFIX),
      })
  }

  fn manifest_path(target: &ImageRef) -> Result<PathBuf, RegistryError> {
    Ok(Self::repository_dir(&target.repository)?.join(format!("{}.json", target.tag)))
  }

  fn check_layer(&self, layer: &LayerRef) -> Result<(), RegistryError> {
    let Some(layers) = &self.layers else {
      return Ok(());
    };
    let present = layer
      .as_str()
      .strip_prefix("sha256:")
      .map(|hash| layers.join(hash).is_dir())
      .unwrap_or(false);
    if present {
      Ok(())
    } else {
      Err(RegistryError::NotFound(format!("layer {}", layer)))
    }
  }
}

fn io_error(target: impl ToString, err: io::Error) -> RegistryError {
  RegistryError::Other {
    target: target.to_string(),
    message: err.to_string(),
  }
}

fn now_unix() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

#[async_trait]
impl Registry for LocalRegistry {
  fn name(&self) -> &'static str {
    "dir"
  }

  async fn push(&self, layer: &LayerRef, target: &ImageRef, labels: &Labels) -> Result<(), RegistryError> {
    self.check_layer(layer)?;
    let path = Self::manifest_path(target)?;
    let manifest = TagManifest {
      layer: layer.clone(),
      labels: labels.clone(),
      pushed_at: now_unix(),
    };
    let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| io_error(target, io::Error::other(e)))?;

    let write_path = path.clone();
    tokio::task::spawn_blocking(move || atomic_write(&write_path, &bytes))
      .await
      .map_err(|e| io_error(target, io::Error::other(e)))?
      .map_err(|e| io_error(target, e))?;

    debug!(target = %target, layer = %layer, path = ?path, "pushed to directory registry");
    Ok(())
  }

  async fn resolve(&self, target: &ImageRef) -> Result<Option<RemoteImage>, RegistryError> {
    let path = Self::manifest_path(target)?;
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_error(target, e)),
    };
    let manifest: TagManifest = serde_json::from_slice(&bytes).map_err(|e| RegistryError::Other {
      target: target.to_string(),
      message: format!("corrupt tag manifest {}: {}", path.display(), e),
    })?;

    Ok(Some(RemoteImage {
      reference: target.clone(),
      layer: manifest.layer,
      labels: manifest.labels,
    }))
  }

  async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
    let dir = Self::repository_dir(repository)?;
    let mut tags = Vec::new();
    let mut entries = match tokio::fs::read_dir(&dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(tags),
      Err(e) => return Err(io_error(repository, e)),
    };

    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(repository, e))? {
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "json")
        && let Some(tag) = tag_from_path(&path)
      {
        tags.push(tag);
      }
    }

    tags.sort();
    Ok(tags)
  }

  async fn delete(&self, target: &ImageRef) -> Result<(), RegistryError> {
    let path = Self::manifest_path(target)?;
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(io_error(target, e)),
    }
  }
}

fn tag_from_path(path: &Path) -> Option<String> {
  path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}
