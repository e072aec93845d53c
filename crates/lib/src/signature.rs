//! Stage signatures.
//!
//! A stage signature is the cache key of a stage: a SHA-256 over the canonical
//! JSON encoding of the stage inputs, in this order:
//!
//! 1. signature format version
//! 2. predecessor signature, or a fixed seed for the first stage
//! 3. stage name
//! 4. base image reference and cache version (base stage only)
//! 5. instruction list, verbatim
//! 6. checksums of declared dependencies, in declaration order
//!
//! Only project-relative paths and content hashes participate, never absolute
//! paths or timestamps, so signatures are stable across machines.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BaseImage, ImageDef, StageDef, StageName};
use crate::consts::{SIGNATURE_SEED, SIGNATURE_VERSION};
use crate::util::hash::{ContentHash, DirHashError, HashError, Hashable, hash_directory, hash_file};

/// Directory names never included in dependency checksums.
const DEPENDENCY_EXCLUSIONS: &[&str] = &[".git"];

/// Content signature of a stage (64 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature(pub String);

impl Signature {
  /// Abbreviated form for log lines and container names.
  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Signature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Error)]
pub enum SignatureError {
  #[error("dependency {path} of stage {stage} does not exist")]
  MissingDependency { stage: StageName, path: String },

  #[error("failed to checksum dependency {path}: {source}")]
  Checksum {
    path: String,
    #[source]
    source: DirHashError,
  },

  #[error("failed to encode signature input: {0}")]
  Encode(#[from] HashError),

  #[error("image {image} is based on image {parent}, whose signature was not provided")]
  MissingParent { image: String, parent: String },

  #[error("image {0} has no stages")]
  NoStages(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct DependencyChecksum {
  path: String,
  checksum: ContentHash,
}

#[derive(Debug, Serialize)]
struct SignatureInput<'a> {
  version: u32,
  predecessor: &'a str,
  stage: StageName,
  base: Option<&'a str>,
  cache_version: Option<&'a str>,
  instructions: &'a [String],
  dependencies: Vec<DependencyChecksum>,
}

impl Hashable for SignatureInput<'_> {}

/// Compute the signature of one stage.
///
/// `predecessor` is the signature of the previous stage of the same image, or
/// for the base stage of a `fromImage` image, the final signature of the parent.
pub fn stage_signature(
  project_dir: &Path,
  image: &ImageDef,
  stage: &StageDef,
  predecessor: Option<&Signature>,
) -> Result<Signature, SignatureError> {
  let (base, cache_version) = if stage.name == StageName::From {
    let base = match &image.base {
      BaseImage::External(reference) => Some(reference.as_str()),
      BaseImage::Image(_) => None,
    };
    (base, image.cache_version.as_deref())
  } else {
    (None, None)
  };

  let input = SignatureInput {
    version: SIGNATURE_VERSION,
    predecessor: predecessor.map(Signature::as_str).unwrap_or(SIGNATURE_SEED),
    stage: stage.name,
    base,
    cache_version,
    instructions: &stage.instructions,
    dependencies: dependency_checksums(project_dir, stage)?,
  };

  Ok(Signature(input.compute_hash()?.0))
}

/// Compute the signatures of all stages of an image, in stage order.
///
/// `parent` must be the final signature of the parent image when the image is
/// declared with `fromImage`.
pub fn image_signatures(
  project_dir: &Path,
  image: &ImageDef,
  parent: Option<&Signature>,
) -> Result<Vec<(StageName, Signature)>, SignatureError> {
  if let Some(parent_name) = image.parent_image()
    && parent.is_none()
  {
    return Err(SignatureError::MissingParent {
      image: image.name.clone(),
      parent: parent_name.to_string(),
    });
  }

  let mut signatures: Vec<(StageName, Signature)> = Vec::with_capacity(image.stages.len());
  let mut predecessor = parent.cloned();

  for stage in &image.stages {
    let signature = stage_signature(project_dir, image, stage, predecessor.as_ref())?;
    predecessor = Some(signature.clone());
    signatures.push((stage.name, signature));
  }

  Ok(signatures)
}

/// Signature of the last stage of an image, which identifies the image.
pub fn final_signature(
  project_dir: &Path,
  image: &ImageDef,
  parent: Option<&Signature>,
) -> Result<Signature, SignatureError> {
  image_signatures(project_dir, image, parent)?
    .pop()
    .map(|(_, signature)| signature)
    .ok_or_else(|| SignatureError::NoStages(image.name.clone()))
}

fn dependency_checksums(project_dir: &Path, stage: &StageDef) -> Result<Vec<DependencyChecksum>, SignatureError> {
  stage
    .dependencies
    .iter()
    .map(|rel| {
      let path = project_dir.join(rel);
      let checksum = if path.is_dir() {
        hash_directory(&path, DEPENDENCY_EXCLUSIONS)
      } else if path.is_file() {
        hash_file(&path)
      } else {
        return Err(SignatureError::MissingDependency {
          stage: stage.name,
          path: rel.clone(),
        });
      }
      .map_err(|source| SignatureError::Checksum {
        path: rel.clone(),
        source,
      })?;

      Ok(DependencyChecksum {
        path: rel.replace('\\', "/"),
        checksum,
      })
    })
    .collect()
}
