//! Project configuration.
//!
//! `conveyor.yaml` declares the project name and its images. Loading produces a
//! validated, immutable [`ProjectConfig`]: unknown fields are rejected, base
//! image references are cross-checked and `fromImage` cycles are refused.

mod load;
mod types;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use load::{load_config, parse_config};
pub use types::*;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("unknown field `{field}` in {context} (expected one of: {})", .expected.join(", "))]
  UnknownField {
    field: String,
    context: String,
    expected: &'static [&'static str],
  },

  #[error("{context}: expected {expected}")]
  InvalidType { context: String, expected: &'static str },

  #[error("{context}: {message}")]
  Invalid { context: String, message: String },
}
