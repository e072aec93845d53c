//! Version-control facts used by tag strategies.
//!
//! Facts come from GitLab CI variables only. The pre-11.0 names
//! (`CI_BUILD_*`) take precedence over the current ones, as GitLab still
//! exports both. The local checkout is never consulted: a branch pipeline on
//! a tagged commit must still be tagged by its branch.

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ENV_COMMIT_TAG: &str = "CI_COMMIT_TAG";
pub const ENV_BUILD_TAG: &str = "CI_BUILD_TAG";
pub const ENV_COMMIT_REF_NAME: &str = "CI_COMMIT_REF_NAME";
pub const ENV_BUILD_REF_NAME: &str = "CI_BUILD_REF_NAME";
pub const ENV_COMMIT_SHA: &str = "CI_COMMIT_SHA";

/// What the CI system knows about the current pipeline.
/// `None` means the fact is not available.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsFacts {
  pub branch: Option<String>,
  pub tag: Option<String>,
  pub commit: Option<String>,
}

/// First non-empty variable of `names`.
fn env_fact(names: &[&str]) -> Option<String> {
  names
    .iter()
    .filter_map(|name| std::env::var(name).ok())
    .map(|value| value.trim().to_string())
    .find(|value| !value.is_empty())
}

impl VcsFacts {
  pub fn from_env() -> Self {
    let facts = VcsFacts {
      tag: env_fact(&[ENV_BUILD_TAG, ENV_COMMIT_TAG]),
      branch: env_fact(&[ENV_BUILD_REF_NAME, ENV_COMMIT_REF_NAME]),
      commit: env_fact(&[ENV_COMMIT_SHA]),
    };
    debug!(tag = ?facts.tag, branch = ?facts.branch, commit = ?facts.commit, "ci facts");
    facts
  }
}
