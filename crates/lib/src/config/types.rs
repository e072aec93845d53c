use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known stage identifiers, in build order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
  /// The base stage: pulls the `from` image or starts from another image's result.
  #[serde(rename = "base")]
  From,
  BeforeInstall,
  Install,
  BeforeSetup,
  Setup,
}

impl StageName {
  pub const ALL: [StageName; 5] = [
    StageName::From,
    StageName::BeforeInstall,
    StageName::Install,
    StageName::BeforeSetup,
    StageName::Setup,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      StageName::From => "base",
      StageName::BeforeInstall => "before-install",
      StageName::Install => "install",
      StageName::BeforeSetup => "before-setup",
      StageName::Setup => "setup",
    }
  }

  /// Inverse of [`StageName::as_str`].
  pub fn parse(name: &str) -> Option<StageName> {
    StageName::ALL.into_iter().find(|s| s.as_str() == name)
  }

  /// Key used for this stage in `conveyor.yaml`.
  pub fn config_key(&self) -> &'static str {
    match self {
      StageName::From => "from",
      StageName::BeforeInstall => "beforeInstall",
      StageName::Install => "install",
      StageName::BeforeSetup => "beforeSetup",
      StageName::Setup => "setup",
    }
  }
}

impl fmt::Display for StageName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Where an image starts from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseImage {
  /// An image reference resolved by the executor backend (e.g. `alpine:3.19`).
  External(String),
  /// The final layer of another image of the same project.
  Image(String),
}

impl fmt::Display for BaseImage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BaseImage::External(reference) => write!(f, "{}", reference),
      BaseImage::Image(name) => write!(f, "image:{}", name),
    }
  }
}

/// One stage of an image definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDef {
  pub name: StageName,
  /// Shell instructions, executed in order.
  pub instructions: Vec<String>,
  /// Paths relative to the project directory whose content feeds the signature.
  pub dependencies: Vec<String>,
}

/// A validated image definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDef {
  pub name: String,
  pub base: BaseImage,
  /// Free-form salt mixed into the base stage signature to force a rebuild.
  pub cache_version: Option<String>,
  /// Stages in build order. The `base` stage is always first.
  pub stages: Vec<StageDef>,
}

impl ImageDef {
  pub fn stage(&self, name: StageName) -> Option<&StageDef> {
    self.stages.iter().find(|s| s.name == name)
  }

  pub fn stage_names(&self) -> Vec<StageName> {
    self.stages.iter().map(|s| s.name).collect()
  }

  /// The image this one is built on top of, if it belongs to the same project.
  pub fn parent_image(&self) -> Option<&str> {
    match &self.base {
      BaseImage::Image(name) => Some(name),
      BaseImage::External(_) => None,
    }
  }
}

/// The validated project configuration graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
  pub project: String,
  pub images: Vec<ImageDef>,
}

impl ProjectConfig {
  pub fn image(&self, name: &str) -> Option<&ImageDef> {
    self.images.iter().find(|i| i.name == name)
  }

  pub fn has_image(&self, name: &str) -> bool {
    self.image(name).is_some()
  }

  pub fn image_names(&self) -> Vec<String> {
    self.images.iter().map(|i| i.name.clone()).collect()
  }

  /// Names in `requested` that the project does not declare, in request order.
  pub fn unknown_images(&self, requested: &[String]) -> Vec<String> {
    let mut unknown: Vec<String> = Vec::new();
    for name in requested {
      if !self.has_image(name) && !unknown.contains(name) {
        unknown.push(name.clone());
      }
    }
    unknown
  }
}
