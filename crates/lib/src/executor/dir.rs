//! Directory executor: layers are plain root filesystem trees stored under
//! `<home>/layers/<content hash>`.
//!
//! Each stage copies its base into a staging directory inside the session
//! temp dir, runs the instructions there with the tree as working directory,
//! hashes the result and moves it into the layer store. A layer directory only
//! ever appears under its final name once complete.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{BuiltLayer, ExecuteError, StageBase, StageExecutor, StageJob, run_instruction};
use crate::consts::DIR_REGISTRY_PREFIX;
use crate::types::LayerRef;
use crate::util::fs::{copy_dir_all, dir_size};
use crate::util::hash::hash_directory;

const LAYER_PREFIX: &str = "sha256:";

/// File inside a rootfs recording the external base it started from.
const BASE_MARKER: &str = ".conveyor-base";

#[derive(Debug, Clone)]
pub struct DirExecutor {
  layers_dir: PathBuf,
}

impl DirExecutor {
  pub fn new(layers_dir: impl Into<PathBuf>) -> Self {
    DirExecutor {
      layers_dir: layers_dir.into(),
    }
  }

  pub fn layers_dir(&self) -> &Path {
    &self.layers_dir
  }

  /// Directory holding `layer`, if it is a directory layer.
  pub fn layer_path(&self, layer: &LayerRef) -> Option<PathBuf> {
    layer
      .as_str()
      .strip_prefix(LAYER_PREFIX)
      .map(|hash| self.layers_dir.join(hash))
  }

  /// Populate `rootfs` with the stage base.
  fn prepare_base(&self, base: &StageBase, rootfs: &Path) -> Result<(), ExecuteError> {
    match base {
      StageBase::Layer(layer) => {
        let path = self
          .layer_path(layer)
          .filter(|p| p.is_dir())
          .ok_or_else(|| ExecuteError::BaseUnavailable {
            reference: layer.to_string(),
            message: "layer is not present in the layer store".to_string(),
          })?;
        copy_dir_all(&path, rootfs)?;
      }
      StageBase::External(reference) => {
        // `dir:<path>` seeds the tree from a local directory; any other
        // reference starts empty and is only recorded.
        if let Some(path) = reference.strip_prefix(DIR_REGISTRY_PREFIX) {
          let path = Path::new(path);
          if !path.is_dir() {
            return Err(ExecuteError::BaseUnavailable {
              reference: reference.clone(),
              message: "directory does not exist".to_string(),
            });
          }
          copy_dir_all(path, rootfs)?;
        } else {
          std::fs::create_dir_all(rootfs)?;
        }
        std::fs::write(rootfs.join(BASE_MARKER), format!("{}\n", reference))?;
      }
    }
    Ok(())
  }

  /// Move a finished tree into the layer store under its content hash.
  fn commit(&self, rootfs: &Path) -> Result<BuiltLayer, ExecuteError> {
    let hash = hash_directory(rootfs, &[]).map_err(|e| ExecuteError::Backend {
      backend: "dir",
      message: e.to_string(),
    })?;
    let target = self.layers_dir.join(&hash.0);
    std::fs::create_dir_all(&self.layers_dir)?;

    if target.is_dir() {
      debug!(layer = %hash, "identical layer already stored");
    } else if let Err(e) = std::fs::rename(rootfs, &target) {
      if !target.is_dir() {
        // Staging and layer store may live on different filesystems.
        debug!(error = %e, "rename failed, copying layer into store");
        let incoming = tempfile::Builder::new()
          .prefix(".incoming-")
          .tempdir_in(&self.layers_dir)?;
        let staged = incoming.path().join("rootfs");
        copy_dir_all(rootfs, &staged)?;
        match std::fs::rename(&staged, &target) {
          Ok(()) => {}
          Err(_) if target.is_dir() => {}
          Err(e) => return Err(e.into()),
        }
      }
    }

    Ok(BuiltLayer {
      layer: LayerRef(format!("{}{}", LAYER_PREFIX, hash.0)),
      size: Some(dir_size(&target)),
    })
  }
}

fn blocking_error(e: tokio::task::JoinError) -> ExecuteError {
  ExecuteError::Io(io::Error::other(e))
}

#[async_trait]
impl StageExecutor for DirExecutor {
  fn name(&self) -> &'static str {
    "dir"
  }

  async fn build_stage(&self, job: &StageJob) -> Result<BuiltLayer, ExecuteError> {
    info!(
      image = %job.image,
      stage = %job.stage,
      signature = %job.signature.short(),
      "building stage"
    );

    tokio::fs::create_dir_all(&job.staging_dir).await?;
    let staging = tempfile::Builder::new()
      .prefix(&format!("{}-", job.signature.short()))
      .tempdir_in(&job.staging_dir)?;
    let rootfs = staging.path().join("rootfs");
    let tmp = staging.path().join("tmp");

    {
      let this = self.clone();
      let base = job.base.clone();
      let rootfs = rootfs.clone();
      tokio::task::spawn_blocking(move || this.prepare_base(&base, &rootfs))
        .await
        .map_err(blocking_error)??;
    }

    let mut env = BTreeMap::new();
    env.insert("CONVEYOR_PROJECT".to_string(), job.project.clone());
    env.insert("CONVEYOR_IMAGE".to_string(), job.image.clone());
    env.insert("CONVEYOR_STAGE".to_string(), job.stage.to_string());
    env.insert("CONVEYOR_ROOTFS".to_string(), rootfs.display().to_string());
    env.insert("CONVEYOR_PROJECT_DIR".to_string(), job.project_dir.display().to_string());
    if let Some(sock) = &job.ssh_auth_sock {
      env.insert("SSH_AUTH_SOCK".to_string(), sock.display().to_string());
    }

    for instruction in &job.instructions {
      run_instruction(instruction, &rootfs, &tmp, &env).await?;
    }

    let this = self.clone();
    let built = tokio::task::spawn_blocking(move || this.commit(&rootfs))
      .await
      .map_err(blocking_error)??;

    info!(image = %job.image, stage = %job.stage, layer = %built.layer, "stage built");
    Ok(built)
  }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use crate::config::StageName;
  use crate::signature::Signature;
  use tempfile::TempDir;

  fn job(temp: &TempDir, base: StageBase, instructions: &[&str]) -> StageJob {
    StageJob {
      project: "demo".into(),
      image: "web".into(),
      stage: StageName::Install,
      signature: Signature("1".repeat(64)),
      base,
      instructions: instructions.iter().map(|s| s.to_string()).collect(),
      project_dir: temp.path().join("project"),
      staging_dir: temp.path().join("tmp"),
      ssh_auth_sock: None,
    }
  }

  #[tokio::test]
  async fn builds_layer_on_top_of_previous_layer() {
    let temp = TempDir::new().unwrap();
    let executor = DirExecutor::new(temp.path().join("layers"));

    let base = executor
      .build_stage(&job(&temp, StageBase::External("alpine:3.19".into()), &[]))
      .await
      .unwrap();
    let base_path = executor.layer_path(&base.layer).unwrap();
    assert_eq!(
      std::fs::read_to_string(base_path.join(BASE_MARKER)).unwrap(),
      "alpine:3.19\n"
    );

    let next = executor
      .build_stage(&job(
        &temp,
        StageBase::Layer(base.layer.clone()),
        &["mkdir -p etc", "echo built > etc/app.conf"],
      ))
      .await
      .unwrap();

    let next_path = executor.layer_path(&next.layer).unwrap();
    assert_ne!(base.layer, next.layer);
    assert!(next_path.join(BASE_MARKER).exists());
    assert_eq!(std::fs::read_to_string(next_path.join("etc/app.conf")).unwrap(), "built\n");
    assert!(next.size.unwrap() > 0);
  }

  #[tokio::test]
  async fn identical_content_yields_identical_layer() {
    let temp = TempDir::new().unwrap();
    let executor = DirExecutor::new(temp.path().join("layers"));
    let base = StageBase::External("alpine:3.19".into());

    let a = executor.build_stage(&job(&temp, base.clone(), &["echo x > f"])).await.unwrap();
    let b = executor.build_stage(&job(&temp, base, &["echo x > f"])).await.unwrap();

    assert_eq!(a.layer, b.layer);
  }

  #[tokio::test]
  async fn failing_instruction_leaves_no_layer() {
    let temp = TempDir::new().unwrap();
    let layers = temp.path().join("layers");
    let executor = DirExecutor::new(&layers);

    let err = executor
      .build_stage(&job(&temp, StageBase::External("scratch".into()), &["echo x > f", "false"]))
      .await
      .unwrap_err();

    assert!(matches!(err, ExecuteError::InstructionFailed { .. }));
    let stored = std::fs::read_dir(&layers).map(|d| d.count()).unwrap_or(0);
    assert_eq!(stored, 0);
  }

  #[tokio::test]
  async fn missing_base_layer_is_reported() {
    let temp = TempDir::new().unwrap();
    let executor = DirExecutor::new(temp.path().join("layers"));

    let err = executor
      .build_stage(&job(&temp, StageBase::Layer(LayerRef("sha256:gone".into())), &[]))
      .await
      .unwrap_err();
    assert!(matches!(err, ExecuteError::BaseUnavailable { .. }));
  }

  #[tokio::test]
  async fn directory_base_is_copied() {
    let temp = TempDir::new().unwrap();
    let seed = temp.path().join("seed");
    std::fs::create_dir_all(seed.join("bin")).unwrap();
    std::fs::write(seed.join("bin/tool"), "#!/bin/sh\n").unwrap();
    let executor = DirExecutor::new(temp.path().join("layers"));

    let built = executor
      .build_stage(&job(
        &temp,
        StageBase::External(format!("{}{}", DIR_REGISTRY_PREFIX, seed.display())),
        &["test -f bin/tool"],
      ))
      .await
      .unwrap();

    assert!(executor.layer_path(&built.layer).unwrap().join("bin/tool").exists());
  }
}
