//! `conveyor build-and-publish`: one invocation, one session, one report.

use anyhow::{Context, Result, bail};
use serde::Serialize;

use super::build::ImageSummary;
use super::common::{GlobalArgs, Workspace, runtime};
use super::publish::{PublishArgs, PublishSummary};
use crate::output::{self, print_json};

#[derive(Debug, Serialize)]
struct Summary {
  build: Vec<ImageSummary>,
  publish: Vec<PublishSummary>,
}

pub fn cmd_build_and_publish(global: &GlobalArgs, images: &[String], args: &PublishArgs) -> Result<()> {
  let rt = runtime()?;

  let (build, publish) = rt.block_on(async {
    let options = args.publish_options(global);
    let workspace = Workspace::open(global, "build-and-publish").await?;
    let result = workspace.conveyor.build_and_publish(images, &options).await;
    workspace.close().await;
    result.context("Build and publish failed")
  })?;

  if global.output.is_json() {
    print_json(&Summary {
      build: super::build::summarize(&build),
      publish: super::publish::summarize(&publish),
    })?;
  } else {
    output::build_report(&build);
    output::publish_report(&publish);
  }

  let build_failed = build.failures().count();
  let publish_failed = publish.images.iter().filter(|i| i.error.is_some()).count();
  if build_failed > 0 || publish_failed > 0 {
    bail!(
      "{} image(s) failed to build, {} failed to publish",
      build_failed,
      publish_failed
    );
  }
  Ok(())
}
