//! Stage executors.
//!
//! An executor turns a base (external image or predecessor layer) plus a list
//! of shell instructions into a new layer. What the instructions mean is the
//! executor's business; the conveyor only orders, caches and publishes.

mod dir;
mod docker;
mod shell;

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::StageName;
use crate::signature::Signature;
use crate::types::LayerRef;

pub use dir::DirExecutor;
pub use docker::DockerExecutor;
pub use shell::run_instruction;

/// What a stage starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageBase {
  /// An external image reference, for the base stage of a `from` image.
  External(String),
  /// A layer built earlier by the same executor.
  Layer(LayerRef),
}

/// One stage to execute.
#[derive(Debug, Clone)]
pub struct StageJob {
  pub project: String,
  pub image: String,
  pub stage: StageName,
  pub signature: Signature,
  pub base: StageBase,
  pub instructions: Vec<String>,
  pub project_dir: PathBuf,
  /// Scratch space owned by the current session. Executors stage work here so
  /// an interrupted build leaves nothing that looks complete.
  pub staging_dir: PathBuf,
  pub ssh_auth_sock: Option<PathBuf>,
}

/// A completed layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltLayer {
  pub layer: LayerRef,
  pub size: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("instruction failed with exit code {code:?}: {instruction}")]
  InstructionFailed {
    instruction: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("base {reference} is not available: {message}")]
  BaseUnavailable { reference: String, message: String },

  #[error("{backend} backend error: {message}")]
  Backend { backend: &'static str, message: String },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
  fn name(&self) -> &'static str;

  /// Execute `job.instructions` on top of `job.base` and return the new layer.
  async fn build_stage(&self, job: &StageJob) -> Result<BuiltLayer, ExecuteError>;
}
