//! `conveyor build`: build images through the stages storage.

use std::time::Instant;

use anyhow::{Result, bail};
use serde::Serialize;

use conveyor_lib::conveyor::{BuildReport, ImageBuild, StageReport};

use super::common::{GlobalArgs, Workspace, runtime};
use crate::output::{self, print_json};

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageStatus {
  Built,
  Failed,
  Skipped,
}

#[derive(Debug, Serialize)]
pub struct ImageSummary {
  pub image: String,
  pub status: ImageStatus,
  pub layer: Option<String>,
  pub stages: Vec<StageReport>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  pub retryable: bool,
}

impl From<&ImageBuild> for ImageSummary {
  fn from(build: &ImageBuild) -> Self {
    let (status, layer, error, retryable) = match &build.result {
      Ok(layer) => (ImageStatus::Built, Some(layer.to_string()), None, false),
      Err(e) if e.is_skip() => (ImageStatus::Skipped, None, Some(e.to_string()), false),
      Err(e) => (ImageStatus::Failed, None, Some(e.to_string()), e.is_retryable()),
    };
    ImageSummary {
      image: build.image.clone(),
      status,
      layer,
      stages: build.stages.clone(),
      error,
      retryable,
    }
  }
}

pub fn summarize(report: &BuildReport) -> Vec<ImageSummary> {
  report.images.iter().map(ImageSummary::from).collect()
}

pub fn cmd_build(global: &GlobalArgs, images: &[String]) -> Result<()> {
  let start = Instant::now();
  let rt = runtime()?;

  let report = rt.block_on(async {
    let workspace = Workspace::open(global, "build").await?;
    let result = workspace.conveyor.build(images).await;
    workspace.close().await;
    Ok::<_, anyhow::Error>(result?)
  })?;

  if global.output.is_json() {
    print_json(&summarize(&report))?;
  } else {
    output::build_report(&report);
    println!();
    output::build_totals(&report, start.elapsed());
  }

  let failed = report.failures().count();
  if failed > 0 {
    bail!("{} image(s) failed to build", failed);
  }
  Ok(())
}
