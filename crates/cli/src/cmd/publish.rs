//! `conveyor publish`: push built images to the images repository.

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use conveyor_lib::conveyor::{PublishOptions, PublishReport, PublishedTag};
use conveyor_lib::tag::{TagOptions, TaggingStrategy};
use conveyor_lib::vcs::VcsFacts;

use super::common::{GlobalArgs, Workspace, runtime};
use crate::output::{self, print_json};

/// Tagging strategy names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TaggingStrategyArg {
  TagOrBranch,
}

impl From<TaggingStrategyArg> for TaggingStrategy {
  fn from(arg: TaggingStrategyArg) -> Self {
    match arg {
      TaggingStrategyArg::TagOrBranch => TaggingStrategy::TagOrBranch,
    }
  }
}

#[derive(Debug, Clone, Args)]
pub struct PublishArgs {
  /// Images repository, e.g. registry.example.com/group/project or dir:/path
  #[arg(long, env = "CONVEYOR_IMAGES_REPO")]
  pub images_repo: String,

  /// Custom tag (repeatable)
  #[arg(long = "tag-custom", env = "CONVEYOR_TAG_CUSTOM", value_delimiter = ',')]
  pub tag_custom: Vec<String>,

  /// Tag with a git branch name
  #[arg(long, env = "CONVEYOR_TAG_GIT_BRANCH")]
  pub tag_git_branch: Option<String>,

  /// Tag with a git tag
  #[arg(long, env = "CONVEYOR_TAG_GIT_TAG")]
  pub tag_git_tag: Option<String>,

  /// Tag with a git commit
  #[arg(long, env = "CONVEYOR_TAG_GIT_COMMIT")]
  pub tag_git_commit: Option<String>,

  /// Tag each image with its final stage signature
  #[arg(long, env = "CONVEYOR_TAG_CONTENT_DIGEST")]
  pub tag_content_digest: bool,

  /// Derive the tag from version control facts
  #[arg(long, env = "CONVEYOR_TAGGING_STRATEGY", value_enum)]
  pub tagging_strategy: Option<TaggingStrategyArg>,
}

impl PublishArgs {
  pub fn tag_options(&self) -> TagOptions {
    TagOptions {
      custom: self.tag_custom.clone(),
      git_branch: self.tag_git_branch.clone(),
      git_tag: self.tag_git_tag.clone(),
      git_commit: self.tag_git_commit.clone(),
      content_digest: self.tag_content_digest,
      tagging_strategy: self.tagging_strategy.map(TaggingStrategy::from),
    }
  }

  /// CI facts are only consulted for derived tags.
  pub fn publish_options(&self, global: &GlobalArgs) -> PublishOptions {
    let facts = if self.tagging_strategy.is_some() {
      VcsFacts::from_env()
    } else {
      VcsFacts::default()
    };
    PublishOptions {
      registry: global.images_registry(&self.images_repo),
      repository: self.images_repo.clone(),
      tags: self.tag_options(),
      facts,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct PublishSummary {
  pub image: String,
  pub signature: Option<String>,
  pub tags: Vec<PublishedTag>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

pub fn summarize(report: &PublishReport) -> Vec<PublishSummary> {
  report
    .images
    .iter()
    .map(|image| PublishSummary {
      image: image.image.clone(),
      signature: image.signature.as_ref().map(ToString::to_string),
      tags: image.tags.clone(),
      error: image.error.as_ref().map(ToString::to_string),
    })
    .collect()
}

pub fn cmd_publish(global: &GlobalArgs, images: &[String], args: &PublishArgs) -> Result<()> {
  let rt = runtime()?;

  let report = rt.block_on(async {
    let options = args.publish_options(global);
    let workspace = Workspace::open(global, "publish").await?;
    let result = workspace.conveyor.publish_images(images, &options).await;
    workspace.close().await;
    result.context("Publish failed")
  })?;

  if global.output.is_json() {
    print_json(&summarize(&report))?;
  } else {
    output::publish_report(&report);
  }

  let failed = report.images.iter().filter(|i| i.error.is_some()).count();
  if failed > 0 {
    bail!("{} image(s) failed to publish", failed);
  }
  Ok(())
}
