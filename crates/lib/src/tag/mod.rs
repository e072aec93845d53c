//! Tag strategy resolution.
//!
//! A publish uses exactly one strategy family. Requested options are validated
//! and resolved up front, before any registry is contacted; only
//! `content-digest` tags depend on the image and are expanded per image.

pub mod slug;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_TAG;
use crate::signature::Signature;
use crate::vcs::VcsFacts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagStrategy {
  Custom,
  GitBranch,
  GitTag,
  GitCommit,
  ContentDigest,
}

impl TagStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      TagStrategy::Custom => "custom",
      TagStrategy::GitBranch => "git-branch",
      TagStrategy::GitTag => "git-tag",
      TagStrategy::GitCommit => "git-commit",
      TagStrategy::ContentDigest => "content-digest",
    }
  }
}

impl fmt::Display for TagStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Composite strategies that pick a concrete strategy from VCS facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaggingStrategy {
  /// Git tag when the pipeline runs for a tag, otherwise the branch.
  TagOrBranch,
}

impl TaggingStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaggingStrategy::TagOrBranch => "tag-or-branch",
    }
  }
}

/// Tag options as requested by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagOptions {
  pub custom: Vec<String>,
  pub git_branch: Option<String>,
  pub git_tag: Option<String>,
  pub git_commit: Option<String>,
  pub content_digest: bool,
  pub tagging_strategy: Option<TaggingStrategy>,
}

/// A tag ready to be pushed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTag {
  pub strategy: TagStrategy,
  /// Value before slugging, recorded in image labels.
  pub raw: String,
  /// Registry-safe tag actually used.
  pub slug: String,
}

impl ResolvedTag {
  pub fn new(strategy: TagStrategy, raw: impl Into<String>) -> Self {
    let raw = raw.into();
    ResolvedTag {
      strategy,
      slug: slug::docker_tag(&raw),
      raw,
    }
  }
}

/// Resolved tag options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPlan {
  /// The same tags for every image.
  Fixed(Vec<ResolvedTag>),
  /// One tag per image: its final stage signature.
  ContentDigest,
}

impl TagPlan {
  pub fn tags_for(&self, final_signature: &Signature) -> Vec<ResolvedTag> {
    match self {
      TagPlan::Fixed(tags) => tags.clone(),
      TagPlan::ContentDigest => vec![ResolvedTag::new(TagStrategy::ContentDigest, final_signature.as_str())],
    }
  }
}

#[derive(Debug, Error)]
pub enum TagError {
  #[error("conflicting tag strategies {}: use only one of them", .strategies.join(", "))]
  ConflictingStrategies { strategies: Vec<&'static str> },

  #[error("none of the environment variables $CI_COMMIT_TAG or $CI_COMMIT_REF_NAME is set for the {strategy} strategy")]
  NoTagSource { strategy: &'static str },

  #[error("invalid {strategy} tag {value:?}: {reason}")]
  Invalid {
    strategy: TagStrategy,
    value: String,
    reason: &'static str,
  },
}

/// Resolve a composite strategy to a concrete one using VCS facts.
pub fn resolve_tagging_strategy(strategy: TaggingStrategy, facts: &VcsFacts) -> Result<ResolvedTag, TagError> {
  match strategy {
    TaggingStrategy::TagOrBranch => {
      if let Some(tag) = &facts.tag {
        Ok(ResolvedTag::new(TagStrategy::GitTag, tag))
      } else if let Some(branch) = &facts.branch {
        Ok(ResolvedTag::new(TagStrategy::GitBranch, branch))
      } else {
        Err(TagError::NoTagSource {
          strategy: strategy.as_str(),
        })
      }
    }
  }
}

/// Validate and resolve the requested options. No options means `custom: latest`.
pub fn resolve(options: &TagOptions, facts: &VcsFacts) -> Result<TagPlan, TagError> {
  let mut families: Vec<&'static str> = Vec::new();
  if !options.custom.is_empty() {
    families.push(TagStrategy::Custom.as_str());
  }
  if options.git_branch.is_some() {
    families.push(TagStrategy::GitBranch.as_str());
  }
  if options.git_tag.is_some() {
    families.push(TagStrategy::GitTag.as_str());
  }
  if options.git_commit.is_some() {
    families.push(TagStrategy::GitCommit.as_str());
  }
  if options.content_digest {
    families.push(TagStrategy::ContentDigest.as_str());
  }
  if let Some(strategy) = options.tagging_strategy {
    families.push(strategy.as_str());
  }

  if families.len() > 1 {
    return Err(TagError::ConflictingStrategies { strategies: families });
  }

  if options.content_digest {
    return Ok(TagPlan::ContentDigest);
  }
  if let Some(strategy) = options.tagging_strategy {
    return Ok(TagPlan::Fixed(vec![resolve_tagging_strategy(strategy, facts)?]));
  }

  let requested: Vec<(TagStrategy, &String)> = options
    .custom
    .iter()
    .map(|v| (TagStrategy::Custom, v))
    .chain(options.git_branch.iter().map(|v| (TagStrategy::GitBranch, v)))
    .chain(options.git_tag.iter().map(|v| (TagStrategy::GitTag, v)))
    .chain(options.git_commit.iter().map(|v| (TagStrategy::GitCommit, v)))
    .collect();

  if requested.is_empty() {
    return Ok(TagPlan::Fixed(vec![ResolvedTag::new(TagStrategy::Custom, DEFAULT_TAG)]));
  }

  let mut tags: Vec<ResolvedTag> = Vec::new();
  for (strategy, value) in requested {
    if value.trim().is_empty() {
      return Err(TagError::Invalid {
        strategy,
        value: value.clone(),
        reason: "value is empty",
      });
    }
    let tag = ResolvedTag::new(strategy, value);
    if !tags.iter().any(|t| t.slug == tag.slug) {
      tags.push(tag);
    }
  }

  Ok(TagPlan::Fixed(tags))
}
