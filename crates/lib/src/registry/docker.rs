//! Registry backend driving the docker CLI.
//!
//! Credentials come from the docker client configuration (`docker login`);
//! nothing here handles authentication.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Labels, Registry, RegistryError, RemoteImage};
use crate::consts::LABEL_LAYER;
use crate::types::{ImageRef, LayerRef};

const AUTH_MARKERS: &[&str] = &[
  "unauthorized",
  "authentication required",
  "denied",
  "no basic auth credentials",
];
const NOT_FOUND_MARKERS: &[&str] = &["not found", "no such image", "manifest unknown", "does not exist"];
const TRANSIENT_MARKERS: &[&str] = &[
  "timeout",
  "timed out",
  "connection refused",
  "connection reset",
  "tls handshake",
  "too many requests",
  "502 bad gateway",
  "503 service unavailable",
  "504 gateway",
  "temporary failure",
];

#[derive(Debug, Clone)]
pub struct DockerRegistry {
  binary: String,
}

impl Default for DockerRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl DockerRegistry {
  pub fn new() -> Self {
    DockerRegistry {
      binary: "docker".to_string(),
    }
  }

  async fn docker(&self, args: &[String], stdin: Option<&str>, target: &str) -> Result<String, RegistryError> {
    debug!(binary = %self.binary, args = ?args, "running docker");

    let mut command = Command::new(&self.binary);
    command
      .args(args)
      .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| RegistryError::Other {
      target: target.to_string(),
      message: format!("failed to run {}: {}", self.binary, e),
    })?;

    if let Some(input) = stdin
      && let Some(mut pipe) = child.stdin.take()
    {
      pipe
        .write_all(input.as_bytes())
        .await
        .map_err(|e| RegistryError::Other {
          target: target.to_string(),
          message: e.to_string(),
        })?;
    }

    let output = child.wait_with_output().await.map_err(|e| RegistryError::Other {
      target: target.to_string(),
      message: e.to_string(),
    })?;

    if output.status.success() {
      Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
      Err(classify(target, String::from_utf8_lossy(&output.stderr).trim()))
    }
  }
}

/// Map docker CLI stderr to a registry error class.
fn classify(target: &str, stderr: &str) -> RegistryError {
  let lower = stderr.to_lowercase();
  let target = target.to_string();
  let message = stderr.to_string();

  if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
    RegistryError::Auth { target, message }
  } else if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
    RegistryError::NotFound(format!("{}: {}", target, message))
  } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
    RegistryError::Transient { target, message }
  } else {
    RegistryError::Other { target, message }
  }
}

fn parse_inspect(target: &ImageRef, json: &str) -> Result<RemoteImage, RegistryError> {
  let value: serde_json::Value = serde_json::from_str(json).map_err(|e| RegistryError::Other {
    target: target.to_string(),
    message: format!("unexpected docker inspect output: {}", e),
  })?;

  let labels: Labels = value
    .pointer("/Config/Labels")
    .and_then(|l| l.as_object())
    .map(|map| {
      map
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
        .collect()
    })
    .unwrap_or_default();

  let layer = labels
    .get(LABEL_LAYER)
    .cloned()
    .or_else(|| value.get("Id").and_then(|id| id.as_str()).map(str::to_string))
    .ok_or_else(|| RegistryError::Other {
      target: target.to_string(),
      message: "docker inspect output has no image id".to_string(),
    })?;

  Ok(RemoteImage {
    reference: target.clone(),
    layer: LayerRef(layer),
    labels,
  })
}

#[async_trait]
impl Registry for DockerRegistry {
  fn name(&self) -> &'static str {
    "docker"
  }

  async fn push(&self, layer: &LayerRef, target: &ImageRef, labels: &Labels) -> Result<(), RegistryError> {
    let reference = target.to_string();

    // Labels can only be attached by building a trivial image on top of the layer.
    let mut args = vec!["build".to_string(), "--quiet".to_string()];
    for (key, value) in labels {
      args.push("--label".to_string());
      args.push(format!("{}={}", key, value));
    }
    args.push("--label".to_string());
    args.push(format!("{}={}", LABEL_LAYER, layer));
    args.extend(["--tag".to_string(), reference.clone(), "-".to_string()]);
    let dockerfile = format!("FROM {}\n", layer);
    self.docker(&args, Some(&dockerfile), &reference).await?;

    self
      .docker(&["push".to_string(), reference.clone()], None, &reference)
      .await?;
    Ok(())
  }

  async fn resolve(&self, target: &ImageRef) -> Result<Option<RemoteImage>, RegistryError> {
    let reference = target.to_string();

    match self
      .docker(&["pull".to_string(), "--quiet".to_string(), reference.clone()], None, &reference)
      .await
    {
      Ok(_) => {}
      Err(RegistryError::NotFound(_)) => return Ok(None),
      Err(e) => return Err(e),
    }

    let json = self
      .docker(
        &[
          "image".to_string(),
          "inspect".to_string(),
          "--format".to_string(),
          "{{json .}}".to_string(),
          reference.clone(),
        ],
        None,
        &reference,
      )
      .await?;

    parse_inspect(target, &json).map(Some)
  }

  /// The docker CLI only sees tags pulled into the local daemon, so the remote
  /// tag list is out of reach.
  async fn list_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
    Err(RegistryError::Unsupported {
      registry: "docker",
      operation: "list tags of",
      target: repository.to_string(),
    })
  }

  /// `docker image rm` would only untag the local copy and leave the remote
  /// tag in place.
  async fn delete(&self, target: &ImageRef) -> Result<(), RegistryError> {
    Err(RegistryError::Unsupported {
      registry: "docker",
      operation: "delete",
      target: target.to_string(),
    })
  }
}
