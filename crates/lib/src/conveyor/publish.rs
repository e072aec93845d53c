//! Publishing built images to an images repository.
//!
//! Each tag target is `<repository>/<image>:<tag>`. A target that already
//! points at the same layer with the same provenance labels is left alone, so
//! publishing twice is a no-op.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::types::{ImagePublish, PublishError, PublishReport, PublishedTag, PushStatus};
use super::{Conveyor, plan};
use crate::consts::{LABEL_IMAGE, LABEL_STAGES_SIGNATURE, LABEL_TAG_STRATEGY, LABEL_TAG_VALUE};
use crate::config::ProjectConfig;
use crate::registry::{Labels, Registry, RegistryError};
use crate::signature::{self, Signature, SignatureError};
use crate::tag::{self, ResolvedTag, TagError, TagOptions, TagPlan};
use crate::types::{ImageRef, LayerRef};
use crate::vcs::VcsFacts;

/// Where and how to publish.
#[derive(Clone)]
pub struct PublishOptions {
  pub registry: Arc<dyn Registry>,
  /// Images repository, e.g. `registry.example.com/group/project`.
  pub repository: String,
  pub tags: TagOptions,
  pub facts: VcsFacts,
}

impl PublishOptions {
  pub fn tag_plan(&self) -> Result<TagPlan, TagError> {
    tag::resolve(&self.tags, &self.facts)
  }

  pub fn target(&self, image: &str, tag: &ResolvedTag) -> ImageRef {
    ImageRef::new(format!("{}/{}", self.repository.trim_end_matches('/'), image), &tag.slug)
  }
}

/// Provenance labels attached to every published tag.
pub fn provenance_labels(image: &str, tag: &ResolvedTag, signature: &Signature) -> Labels {
  Labels::from([
    (LABEL_IMAGE.to_string(), image.to_string()),
    (LABEL_TAG_STRATEGY.to_string(), tag.strategy.as_str().to_string()),
    (LABEL_TAG_VALUE.to_string(), tag.raw.clone()),
    (LABEL_STAGES_SIGNATURE.to_string(), signature.to_string()),
  ])
}

impl Conveyor {
  /// Publish already built `images` (every image when empty).
  ///
  /// Image names and tag options are validated before any registry is
  /// contacted. Failures are per image; the other images are still published.
  pub async fn publish_images(&self, images: &[String], options: &PublishOptions) -> Result<PublishReport, PublishError> {
    let unknown = self.config.unknown_images(images);
    if !unknown.is_empty() {
      return Err(PublishError::UnknownImages(unknown));
    }
    let tag_plan = options.tag_plan()?;

    let requested: Vec<String> = if images.is_empty() {
      self.config.image_names()
    } else {
      images.to_vec()
    };

    let mut requested_unique: Vec<String> = Vec::with_capacity(requested.len());
    for name in requested {
      if !requested_unique.contains(&name) {
        requested_unique.push(name);
      }
    }

    let mut signatures = {
      let project_dir = self.options.project_dir.clone();
      let config = self.config.clone();
      let images = requested_unique.clone();
      tokio::task::spawn_blocking(move || final_signatures(&project_dir, &config, &images))
        .await
        .unwrap_or_else(|e| std::panic::resume_unwind(e.into_panic()))
    };

    let mut report = PublishReport::default();
    for name in &requested_unique {
      let signature = match signatures.remove(name) {
        Some(Ok(signature)) => signature,
        Some(Err(source)) => {
          warn!(image = %name, error = %source, "cannot compute image signature");
          report.images.push(ImagePublish {
            image: name.clone(),
            signature: None,
            tags: Vec::new(),
            error: Some(PublishError::Signature {
              image: name.clone(),
              source,
            }),
          });
          continue;
        }
        None => continue,
      };

      let outcome = self.publish_image(name, &signature, &tag_plan, options).await;
      if let Some(e) = &outcome.error {
        warn!(image = %name, error = %e, "publish failed");
      }
      report.images.push(outcome);
    }

    info!(
      images = report.images.len(),
      failed = report.images.iter().filter(|i| i.error.is_some()).count(),
      repository = %options.repository,
      "publish complete"
    );
    Ok(report)
  }

  async fn publish_image(
    &self,
    name: &str,
    signature: &Signature,
    tag_plan: &TagPlan,
    options: &PublishOptions,
  ) -> ImagePublish {
    let mut outcome = ImagePublish {
      image: name.to_string(),
      signature: Some(signature.clone()),
      tags: Vec::new(),
      error: None,
    };

    let entry = match self.backends.storage.get(signature).await {
      Ok(Some(entry)) => entry,
      Ok(None) => {
        outcome.error = Some(PublishError::NotBuilt {
          image: name.to_string(),
          signature: signature.clone(),
        });
        return outcome;
      }
      Err(source) => {
        outcome.error = Some(PublishError::Storage {
          image: name.to_string(),
          source,
        });
        return outcome;
      }
    };

    for tag in tag_plan.tags_for(signature) {
      let target = options.target(name, &tag);
      let labels = provenance_labels(name, &tag, signature);

      match self
        .push_tag(options.registry.as_ref(), &target, &entry.layer, &labels)
        .await
      {
        Ok(status) => {
          info!(image = %name, target = %target, status = ?status, "published tag");
          outcome.tags.push(PublishedTag { tag, target, status });
        }
        Err(source) => {
          outcome.error = Some(PublishError::Registry {
            image: name.to_string(),
            target,
            source,
          });
          return outcome;
        }
      }
    }
    outcome
  }

  async fn push_tag(
    &self,
    registry: &dyn Registry,
    target: &ImageRef,
    layer: &LayerRef,
    labels: &Labels,
  ) -> Result<PushStatus, RegistryError> {
    let retry = self.options.retry;
    let what = format!("resolve {}", target);
    let existing = retry.run(&what, || registry.resolve(target)).await?;

    if let Some(existing) = existing
      && &existing.layer == layer
      && labels.iter().all(|(k, v)| existing.labels.get(k) == Some(v))
    {
      debug!(target = %target, "tag already up to date");
      return Ok(PushStatus::Unchanged);
    }

    let what = format!("push {}", target);
    retry.run(&what, || registry.push(layer, target, labels)).await?;
    Ok(PushStatus::Pushed)
  }
}

/// Final stage signature of `images` and their ancestors, parents first.
fn final_signatures(
  project_dir: &Path,
  config: &ProjectConfig,
  images: &[String],
) -> HashMap<String, Result<Signature, SignatureError>> {
  let mut finals: HashMap<String, Result<Signature, SignatureError>> = HashMap::new();
  let Ok(order) = plan(config, images) else {
    return finals;
  };

  for name in order.order() {
    let Some(image) = config.image(name) else {
      continue;
    };
    let result = match image.parent_image() {
      Some(parent) => match finals.get(parent) {
        Some(Ok(parent_signature)) => signature::final_signature(project_dir, image, Some(parent_signature)),
        _ => Err(SignatureError::MissingParent {
          image: name.clone(),
          parent: parent.to_string(),
        }),
      },
      None => signature::final_signature(project_dir, image, None),
    };
    finals.insert(name.clone(), result);
  }
  finals
}
