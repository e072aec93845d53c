//! Docker executor: each stage is `docker run` on the base image followed by
//! `docker commit` of the container.

use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{BuiltLayer, ExecuteError, StageBase, StageExecutor, StageJob};
use crate::consts::LABEL_STAGE;
use crate::types::LayerRef;

const BACKEND: &str = "docker";
const CONTAINER_SSH_SOCK: &str = "/run/conveyor/ssh-agent.sock";

#[derive(Debug, Clone)]
pub struct DockerExecutor {
  binary: String,
}

impl Default for DockerExecutor {
  fn default() -> Self {
    Self::new()
  }
}

impl DockerExecutor {
  pub fn new() -> Self {
    DockerExecutor {
      binary: "docker".to_string(),
    }
  }

  async fn output(&self, args: &[String]) -> Result<Output, ExecuteError> {
    debug!(args = ?args, "running docker");
    Command::new(&self.binary)
      .args(args)
      .output()
      .await
      .map_err(|e| ExecuteError::Backend {
        backend: BACKEND,
        message: format!("failed to run {}: {}", self.binary, e),
      })
  }

  async fn docker(&self, args: &[String]) -> Result<String, ExecuteError> {
    let output = self.output(args).await?;
    if output.status.success() {
      Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
      Err(ExecuteError::Backend {
        backend: BACKEND,
        message: format!(
          "docker {} failed: {}",
          args.first().map(String::as_str).unwrap_or_default(),
          String::from_utf8_lossy(&output.stderr).trim()
        ),
      })
    }
  }

  async fn image_id(&self, reference: &str) -> Result<String, ExecuteError> {
    self
      .docker(&strings(&["image", "inspect", "--format", "{{.Id}}", reference]))
      .await
  }

  async fn image_size(&self, id: &str) -> Option<u64> {
    self
      .docker(&strings(&["image", "inspect", "--format", "{{.Size}}", id]))
      .await
      .ok()
      .and_then(|s| s.parse().ok())
  }

  /// Image id of the base, pulling external references when missing locally.
  async fn resolve_base(&self, base: &StageBase) -> Result<String, ExecuteError> {
    match base {
      StageBase::Layer(layer) => self
        .image_id(layer.as_str())
        .await
        .map_err(|e| ExecuteError::BaseUnavailable {
          reference: layer.to_string(),
          message: e.to_string(),
        }),
      StageBase::External(reference) => {
        if let Ok(id) = self.image_id(reference).await {
          return Ok(id);
        }
        info!(image = %reference, "pulling base image");
        self
          .docker(&strings(&["pull", "--quiet", reference]))
          .await
          .map_err(|e| ExecuteError::BaseUnavailable {
            reference: reference.clone(),
            message: e.to_string(),
          })?;
        self.image_id(reference).await
      }
    }
  }
}

fn strings(args: &[&str]) -> Vec<String> {
  args.iter().map(|s| s.to_string()).collect()
}

/// `docker run` arguments for one stage container.
fn run_args(job: &StageJob, container: &str, base: String, script: &str) -> Vec<String> {
  let mut run = strings(&["run", "--name", container, "--label"]);
  run.push(format!("{}={}", LABEL_STAGE, job.stage));
  if let Some(sock) = &job.ssh_auth_sock {
    run.push("--volume".to_string());
    run.push(format!("{}:{}", sock.display(), CONTAINER_SSH_SOCK));
    run.push("--env".to_string());
    run.push(format!("SSH_AUTH_SOCK={}", CONTAINER_SSH_SOCK));
  }
  run.extend([
    "--entrypoint".to_string(),
    "/bin/sh".to_string(),
    base,
    "-ec".to_string(),
    script.to_string(),
  ]);
  run
}

#[async_trait]
impl StageExecutor for DockerExecutor {
  fn name(&self) -> &'static str {
    BACKEND
  }

  async fn build_stage(&self, job: &StageJob) -> Result<BuiltLayer, ExecuteError> {
    info!(
      image = %job.image,
      stage = %job.stage,
      signature = %job.signature.short(),
      "building stage"
    );
    let base = self.resolve_base(&job.base).await?;

    if job.instructions.is_empty() {
      let size = self.image_size(&base).await;
      return Ok(BuiltLayer {
        layer: LayerRef(base),
        size,
      });
    }

    let container = format!(
      "conveyor-{}-{}-{}",
      job.project,
      job.signature.short(),
      std::process::id()
    );
    let script = job.instructions.join("\n");

    let run = run_args(job, &container, base, &script);

    let result = async {
      let output = self.output(&run).await?;
      if !output.status.success() {
        return Err(ExecuteError::InstructionFailed {
          instruction: script.clone(),
          code: output.status.code(),
          stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
      }
      self.docker(&strings(&["commit", &container])).await
    }
    .await;

    if let Err(e) = self.docker(&strings(&["rm", "--force", &container])).await {
      warn!(container = %container, error = %e, "failed to remove build container");
    }

    let id = result?;
    let size = self.image_size(&id).await;
    info!(image = %job.image, stage = %job.stage, layer = %id, "stage built");
    Ok(BuiltLayer {
      layer: LayerRef(id),
      size,
    })
  }
}
