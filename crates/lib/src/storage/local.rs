//! Filesystem stages storage: one JSON entry per signature under
//! `<home>/stages/<project>/`.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{PutOutcome, StageEntry, StagesStorage, StorageError, check_same_layer};
use crate::signature::Signature;
use crate::util::fs::write_no_clobber;

const ENTRY_EXT: &str = "json";

#[derive(Debug, Clone)]
pub struct LocalStagesStorage {
  root: PathBuf,
}

impl LocalStagesStorage {
  /// Storage for `project` under `stages_dir` (usually [`crate::paths::stages_dir`] of the home dir).
  pub fn new(stages_dir: &Path, project: &str) -> Self {
    LocalStagesStorage {
      root: stages_dir.join(project),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn entry_path(&self, signature: &Signature) -> PathBuf {
    self.root.join(format!("{}.{}", signature, ENTRY_EXT))
  }

  async fn read_entry(&self, path: &Path) -> Result<Option<StageEntry>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(StorageError::Io {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    serde_json::from_slice(&bytes)
      .map(Some)
      .map_err(|e| StorageError::Corrupt {
        location: path.display().to_string(),
        message: e.to_string(),
      })
  }
}

#[async_trait]
impl StagesStorage for LocalStagesStorage {
  fn describe(&self) -> String {
    self.root.display().to_string()
  }

  async fn get(&self, signature: &Signature) -> Result<Option<StageEntry>, StorageError> {
    self.read_entry(&self.entry_path(signature)).await
  }

  async fn put(&self, signature: &Signature, entry: &StageEntry) -> Result<PutOutcome, StorageError> {
    let path = self.entry_path(signature);
    let bytes = serde_json::to_vec_pretty(entry).map_err(|e| StorageError::Corrupt {
      location: path.display().to_string(),
      message: e.to_string(),
    })?;

    let write_path = path.clone();
    let inserted = tokio::task::spawn_blocking(move || write_no_clobber(&write_path, &bytes))
      .await
      .map_err(|e| StorageError::Io {
        path: path.clone(),
        source: io::Error::other(e),
      })?
      .map_err(|source| StorageError::Io {
        path: path.clone(),
        source,
      })?;

    if inserted {
      debug!(signature = %signature, layer = %entry.layer, "stored stage");
      return Ok(PutOutcome::Inserted);
    }

    let existing = self.read_entry(&path).await?.ok_or_else(|| StorageError::Corrupt {
      location: path.display().to_string(),
      message: "entry vanished during put".to_string(),
    })?;
    check_same_layer(signature, &existing, entry)?;
    Ok(PutOutcome::AlreadyPresent)
  }

  async fn list(&self) -> Result<Vec<Signature>, StorageError> {
    let mut signatures = Vec::new();
    let mut entries = match tokio::fs::read_dir(&self.root).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(signatures),
      Err(source) => {
        return Err(StorageError::Io {
          path: self.root.clone(),
          source,
        });
      }
    };

    while let Some(entry) = entries.next_entry().await.map_err(|source| StorageError::Io {
      path: self.root.clone(),
      source,
    })? {
      let path = entry.path();
      if path.extension().is_none_or(|ext| ext != ENTRY_EXT) {
        continue;
      }
      match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => signatures.push(Signature(stem.to_string())),
        None => warn!(path = ?path, "skipping stages entry with non-UTF-8 name"),
      }
    }

    signatures.sort();
    Ok(signatures)
  }

  async fn remove(&self, signature: &Signature) -> Result<bool, StorageError> {
    let path = self.entry_path(signature);
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(source) => Err(StorageError::Io { path, source }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::StageName;
  use crate::types::LayerRef;
  use std::sync::Arc;
  use tempfile::TempDir;

  fn entry(layer: &str) -> StageEntry {
    StageEntry {
      layer: LayerRef(layer.to_string()),
      created_at: 1_700_000_000,
      size: Some(42),
      image: "web".to_string(),
      stage: StageName::Install,
    }
  }

  fn sig(c: char) -> Signature {
    Signature(c.to_string().repeat(64))
  }

  #[tokio::test]
  async fn put_get_roundtrip() {
    let temp = TempDir::new().unwrap();
    let storage = LocalStagesStorage::new(temp.path(), "demo");

    assert!(!storage.exists(&sig('a')).await.unwrap());
    assert_eq!(storage.put(&sig('a'), &entry("sha256:1")).await.unwrap(), PutOutcome::Inserted);
    assert!(storage.exists(&sig('a')).await.unwrap());
    assert_eq!(storage.get(&sig('a')).await.unwrap(), Some(entry("sha256:1")));
    assert!(storage.root().ends_with("demo"));
  }

  #[tokio::test]
  async fn put_same_layer_is_noop() {
    let temp = TempDir::new().unwrap();
    let storage = LocalStagesStorage::new(temp.path(), "demo");

    storage.put(&sig('a'), &entry("sha256:1")).await.unwrap();
    let mut again = entry("sha256:1");
    again.created_at += 10;

    assert_eq!(storage.put(&sig('a'), &again).await.unwrap(), PutOutcome::AlreadyPresent);
    assert_eq!(storage.get(&sig('a')).await.unwrap().unwrap().created_at, 1_700_000_000);
  }

  #[tokio::test]
  async fn put_different_layer_is_integrity_error() {
    let temp = TempDir::new().unwrap();
    let storage = LocalStagesStorage::new(temp.path(), "demo");

    storage.put(&sig('a'), &entry("sha256:1")).await.unwrap();
    let err = storage.put(&sig('a'), &entry("sha256:2")).await.unwrap_err();

    match err {
      StorageError::Integrity { existing, attempted, .. } => {
        assert_eq!(existing, LayerRef("sha256:1".into()));
        assert_eq!(attempted, LayerRef("sha256:2".into()));
      }
      other => panic!("expected integrity error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn concurrent_puts_keep_a_single_layer() {
    let temp = TempDir::new().unwrap();
    let storage = Arc::new(LocalStagesStorage::new(temp.path(), "demo"));

    let mut handles = Vec::new();
    for i in 0..8 {
      let storage = storage.clone();
      handles.push(tokio::spawn(async move {
        storage.put(&sig('c'), &entry(&format!("sha256:{}", i))).await
      }));
    }

    let mut inserted = 0;
    for handle in handles {
      match handle.await.unwrap() {
        Ok(PutOutcome::Inserted) => inserted += 1,
        Ok(PutOutcome::AlreadyPresent) => panic!("layers differ, cannot be already present"),
        Err(StorageError::Integrity { .. }) => {}
        Err(other) => panic!("unexpected error: {other}"),
      }
    }
    assert_eq!(inserted, 1);
  }

  #[tokio::test]
  async fn list_and_remove() {
    let temp = TempDir::new().unwrap();
    let storage = LocalStagesStorage::new(temp.path(), "demo");
    assert!(storage.list().await.unwrap().is_empty());

    storage.put(&sig('b'), &entry("sha256:2")).await.unwrap();
    storage.put(&sig('a'), &entry("sha256:1")).await.unwrap();
    assert_eq!(storage.list().await.unwrap(), [sig('a'), sig('b')]);

    assert!(storage.remove(&sig('a')).await.unwrap());
    assert!(!storage.remove(&sig('a')).await.unwrap());
    assert_eq!(storage.list().await.unwrap(), [sig('b')]);
  }

  #[tokio::test]
  async fn projects_are_isolated() {
    let temp = TempDir::new().unwrap();
    let one = LocalStagesStorage::new(temp.path(), "one");
    let two = LocalStagesStorage::new(temp.path(), "two");

    one.put(&sig('a'), &entry("sha256:1")).await.unwrap();
    assert!(two.get(&sig('a')).await.unwrap().is_none());
  }
}
