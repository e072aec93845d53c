//! Loading and validation of `conveyor.yaml`.
//!
//! Parsing happens in two passes. The first walks the raw YAML tree and rejects
//! unknown fields; every visit carries an [`Ancestry`] value describing the
//! enclosing nodes, so errors name the exact location (`images[web].shell`)
//! without any shared parser state. The second pass deserializes into the raw
//! structs and converts them into the validated [`ProjectConfig`] graph.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::consts::CONFIG_FILENAME;

use super::ConfigError;
use super::types::{BaseImage, ImageDef, ProjectConfig, StageDef, StageName};

const ROOT_FIELDS: &[&str] = &["project", "images"];
const IMAGE_FIELDS: &[&str] = &["name", "from", "fromImage", "fromCacheVersion", "shell", "dependencies"];
const STAGE_FIELDS: &[&str] = &["beforeInstall", "install", "beforeSetup", "setup"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
  project: String,
  #[serde(default)]
  images: Vec<RawImage>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawImage {
  name: String,
  from: Option<String>,
  from_image: Option<String>,
  from_cache_version: Option<String>,
  #[serde(default)]
  shell: RawStages,
  #[serde(default)]
  dependencies: RawStages,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawStages {
  #[serde(default)]
  before_install: Vec<String>,
  #[serde(default)]
  install: Vec<String>,
  #[serde(default)]
  before_setup: Vec<String>,
  #[serde(default)]
  setup: Vec<String>,
}

impl RawStages {
  fn get(&self, stage: StageName) -> &[String] {
    match stage {
      StageName::From => &[],
      StageName::BeforeInstall => &self.before_install,
      StageName::Install => &self.install,
      StageName::BeforeSetup => &self.before_setup,
      StageName::Setup => &self.setup,
    }
  }
}

/// Chain of enclosing nodes for the node currently being visited.
#[derive(Debug)]
struct Ancestry<'a> {
  node: Cow<'a, str>,
  parent: Option<&'a Ancestry<'a>>,
}

impl<'a> Ancestry<'a> {
  fn root() -> Self {
    Ancestry {
      node: Cow::Borrowed(""),
      parent: None,
    }
  }

  fn child(&'a self, node: impl Into<Cow<'a, str>>) -> Ancestry<'a> {
    Ancestry {
      node: node.into(),
      parent: Some(self),
    }
  }

  fn path(&self) -> String {
    let mut parts = Vec::new();
    let mut current = Some(self);
    while let Some(ancestry) = current {
      if !ancestry.node.is_empty() {
        parts.push(ancestry.node.as_ref());
      }
      current = ancestry.parent;
    }
    parts.reverse();

    let mut path = String::new();
    for part in parts {
      if !path.is_empty() && !part.starts_with('[') {
        path.push('.');
      }
      path.push_str(part);
    }
    if path.is_empty() { "<root>".to_string() } else { path }
  }
}

/// Load `conveyor.yaml` from the project directory.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
  let path = project_dir.join(CONFIG_FILENAME);
  if !path.exists() {
    return Err(ConfigError::NotFound(path));
  }

  let source = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
    path: path.clone(),
    source,
  })?;

  let config = parse_config(&source, &path)?;
  debug!(project = %config.project, images = config.images.len(), "loaded configuration");
  Ok(config)
}

/// Parse and validate configuration source text.
///
/// `origin` is only used for error messages.
pub fn parse_config(source: &str, origin: &Path) -> Result<ProjectConfig, ConfigError> {
  let value: Value = serde_yaml::from_str(source).map_err(|e| ConfigError::Parse {
    path: origin.to_path_buf(),
    message: e.to_string(),
  })?;

  check_root(&value, &Ancestry::root())?;

  let raw: RawConfig = serde_yaml::from_value(value).map_err(|e| ConfigError::Parse {
    path: origin.to_path_buf(),
    message: e.to_string(),
  })?;

  convert(raw)
}

fn check_root(value: &Value, ancestry: &Ancestry<'_>) -> Result<(), ConfigError> {
  let mapping = expect_mapping(value, ancestry)?;
  check_fields(mapping, ROOT_FIELDS, ancestry)?;

  if let Some(images) = mapping.get("images") {
    let images_ancestry = ancestry.child("images");
    let Value::Sequence(items) = images else {
      return Err(ConfigError::InvalidType {
        context: images_ancestry.path(),
        expected: "a list of images",
      });
    };

    for (idx, item) in items.iter().enumerate() {
      let label = item
        .get("name")
        .and_then(Value::as_str)
        .map(|name| format!("[{}]", name))
        .unwrap_or_else(|| format!("[{}]", idx));
      check_image(item, &images_ancestry.child(label))?;
    }
  }

  Ok(())
}

fn check_image(value: &Value, ancestry: &Ancestry<'_>) -> Result<(), ConfigError> {
  let mapping = expect_mapping(value, ancestry)?;
  check_fields(mapping, IMAGE_FIELDS, ancestry)?;

  for section in ["shell", "dependencies"] {
    if let Some(stages) = mapping.get(section) {
      check_stages(stages, &ancestry.child(section))?;
    }
  }

  Ok(())
}

fn check_stages(value: &Value, ancestry: &Ancestry<'_>) -> Result<(), ConfigError> {
  let mapping = expect_mapping(value, ancestry)?;
  check_fields(mapping, STAGE_FIELDS, ancestry)?;

  for (key, entries) in mapping {
    let key = key.as_str().unwrap_or_default();
    let entry_ancestry = ancestry.child(key);
    let valid = match entries {
      Value::Sequence(items) => items.iter().all(|item| item.is_string()),
      _ => false,
    };
    if !valid {
      return Err(ConfigError::InvalidType {
        context: entry_ancestry.path(),
        expected: "a list of strings",
      });
    }
  }

  Ok(())
}

fn expect_mapping<'v>(value: &'v Value, ancestry: &Ancestry<'_>) -> Result<&'v Mapping, ConfigError> {
  value.as_mapping().ok_or_else(|| ConfigError::InvalidType {
    context: ancestry.path(),
    expected: "a mapping",
  })
}

fn check_fields(mapping: &Mapping, allowed: &'static [&'static str], ancestry: &Ancestry<'_>) -> Result<(), ConfigError> {
  for key in mapping.keys() {
    let name = match key.as_str() {
      Some(name) => name,
      None => {
        return Err(ConfigError::InvalidType {
          context: ancestry.path(),
          expected: "string keys",
        });
      }
    };
    if !allowed.contains(&name) {
      return Err(ConfigError::UnknownField {
        field: name.to_string(),
        context: ancestry.path(),
        expected: allowed,
      });
    }
  }
  Ok(())
}

fn convert(raw: RawConfig) -> Result<ProjectConfig, ConfigError> {
  if !is_valid_name(&raw.project) {
    return Err(ConfigError::Invalid {
      context: "project".to_string(),
      message: format!(
        "project name '{}' must be lowercase alphanumerics separated by '.', '_' or '-'",
        raw.project
      ),
    });
  }

  let mut seen = HashSet::new();
  let mut images = Vec::with_capacity(raw.images.len());

  for raw_image in raw.images {
    let context = format!("images[{}]", raw_image.name);

    if !is_valid_name(&raw_image.name) {
      return Err(ConfigError::Invalid {
        context,
        message: "image name must be lowercase alphanumerics separated by '.', '_' or '-'".to_string(),
      });
    }
    if !seen.insert(raw_image.name.clone()) {
      return Err(ConfigError::Invalid {
        context,
        message: "image is declared more than once".to_string(),
      });
    }

    images.push(convert_image(raw_image, &context)?);
  }

  let config = ProjectConfig {
    project: raw.project,
    images,
  };
  check_references(&config)?;
  Ok(config)
}

fn convert_image(raw: RawImage, context: &str) -> Result<ImageDef, ConfigError> {
  let base = match (raw.from, raw.from_image) {
    (Some(reference), None) if !reference.trim().is_empty() => BaseImage::External(reference),
    (None, Some(image)) => BaseImage::Image(image),
    (Some(_), Some(_)) => {
      return Err(ConfigError::Invalid {
        context: context.to_string(),
        message: "'from' and 'fromImage' are mutually exclusive".to_string(),
      });
    }
    _ => {
      return Err(ConfigError::Invalid {
        context: context.to_string(),
        message: "one of 'from' or 'fromImage' is required".to_string(),
      });
    }
  };

  let mut stages = vec![StageDef {
    name: StageName::From,
    instructions: Vec::new(),
    dependencies: Vec::new(),
  }];

  for name in &StageName::ALL[1..] {
    let instructions = raw.shell.get(*name).to_vec();
    let dependencies = raw.dependencies.get(*name).to_vec();

    if instructions.is_empty() {
      if !dependencies.is_empty() {
        return Err(ConfigError::Invalid {
          context: format!("{}.dependencies.{}", context, name.config_key()),
          message: "dependencies declared for a stage without instructions".to_string(),
        });
      }
      continue;
    }

    for dep in &dependencies {
      check_dependency_path(dep, &format!("{}.dependencies.{}", context, name.config_key()))?;
    }

    stages.push(StageDef {
      name: *name,
      instructions,
      dependencies,
    });
  }

  Ok(ImageDef {
    name: raw.name,
    base,
    cache_version: raw.from_cache_version,
    stages,
  })
}

fn check_dependency_path(dep: &str, context: &str) -> Result<(), ConfigError> {
  let path = PathBuf::from(dep);
  let escapes = path
    .components()
    .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
  if dep.is_empty() || escapes {
    return Err(ConfigError::Invalid {
      context: context.to_string(),
      message: format!("dependency '{}' must be a relative path inside the project", dep),
    });
  }
  Ok(())
}

fn check_references(config: &ProjectConfig) -> Result<(), ConfigError> {
  let mut graph = DiGraph::<&str, ()>::new();
  let nodes: BTreeMap<&str, _> = config
    .images
    .iter()
    .map(|image| (image.name.as_str(), graph.add_node(image.name.as_str())))
    .collect();

  for image in &config.images {
    let Some(parent) = image.parent_image() else {
      continue;
    };
    let Some(&parent_idx) = nodes.get(parent) else {
      return Err(ConfigError::Invalid {
        context: format!("images[{}].fromImage", image.name),
        message: format!("image '{}' is not declared", parent),
      });
    };
    graph.add_edge(parent_idx, nodes[image.name.as_str()], ());
  }

  if is_cyclic_directed(&graph) {
    return Err(ConfigError::Invalid {
      context: "images".to_string(),
      message: "fromImage references form a cycle".to_string(),
    });
  }

  Ok(())
}

fn is_valid_name(name: &str) -> bool {
  let bytes = name.as_bytes();
  !bytes.is_empty()
    && bytes.len() <= 128
    && bytes[0].is_ascii_alphanumeric()
    && bytes[bytes.len() - 1].is_ascii_alphanumeric()
    && bytes
      .iter()
      .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'))
}
