use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque reference to a built layer, as understood by the executor backend.
///
/// The directory backend uses `sha256:<content hash>`; the docker backend uses
/// the committed image id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerRef(pub String);

impl LayerRef {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for LayerRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A fully qualified `<repository>:<tag>` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
  pub repository: String,
  pub tag: String,
}

impl ImageRef {
  pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
    ImageRef {
      repository: repository.into(),
      tag: tag.into(),
    }
  }

  /// Parse `<repository>:<tag>`. The tag is the part after the last `:` that
  /// follows the last `/`, so registry ports are not mistaken for tags.
  pub fn parse(reference: &str) -> Option<Self> {
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    let colon = reference[name_start..].rfind(':')? + name_start;
    let (repository, tag) = (&reference[..colon], &reference[colon + 1..]);
    if repository.is_empty() || tag.is_empty() {
      return None;
    }
    Some(ImageRef::new(repository, tag))
  }
}

impl fmt::Display for ImageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.repository, self.tag)
  }
}
