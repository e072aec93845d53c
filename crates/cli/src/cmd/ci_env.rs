//! `conveyor ci-env`: shell exports for a CI job.

use anyhow::Result;
use clap::ValueEnum;

use conveyor_lib::tag::{TagStrategy, TaggingStrategy, resolve_tagging_strategy};
use conveyor_lib::vcs::VcsFacts;

use super::publish::TaggingStrategyArg;

/// Supported CI systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CiSystem {
  Gitlab,
}

const ENV_REGISTRY_IMAGE: &str = "CI_REGISTRY_IMAGE";

/// Quote a value for POSIX shells.
fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

/// Exports for the given facts. `registry_image` is the CI registry repository.
pub fn ci_exports(
  strategy: TaggingStrategy,
  facts: &VcsFacts,
  registry_image: Option<&str>,
) -> Result<Vec<(&'static str, String)>> {
  let tag = resolve_tagging_strategy(strategy, facts)?;
  let variable = match tag.strategy {
    TagStrategy::GitTag => "CONVEYOR_TAG_GIT_TAG",
    _ => "CONVEYOR_TAG_GIT_BRANCH",
  };

  let mut exports = vec![(variable, tag.raw)];
  if let Some(repo) = registry_image.filter(|r| !r.is_empty()) {
    exports.push(("CONVEYOR_IMAGES_REPO", repo.to_string()));
  }
  Ok(exports)
}

pub fn cmd_ci_env(system: CiSystem, strategy: TaggingStrategyArg) -> Result<()> {
  let facts = match system {
    CiSystem::Gitlab => VcsFacts::from_env(),
  };
  let registry_image = std::env::var(ENV_REGISTRY_IMAGE).ok();

  for (name, value) in ci_exports(strategy.into(), &facts, registry_image.as_deref())? {
    println!("export {}={}", name, shell_quote(&value));
  }
  Ok(())
}
