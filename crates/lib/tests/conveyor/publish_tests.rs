use std::sync::Arc;

use conveyor_lib::consts::{LABEL_IMAGE, LABEL_STAGES_SIGNATURE, LABEL_TAG_STRATEGY, LABEL_TAG_VALUE};
use conveyor_lib::conveyor::{PublishError, PublishOptions, PushStatus};
use conveyor_lib::registry::{LocalRegistry, Registry};
use conveyor_lib::tag::{TagOptions, TaggingStrategy};
use conveyor_lib::types::ImageRef;
use conveyor_lib::vcs::VcsFacts;

use super::common::TestProject;

const APP: &str = r#"
project: shop
images:
  - name: base
    from: alpine:3.19
    shell:
      install: [echo base > base.txt]
  - name: web
    fromImage: base
    shell:
      setup: [echo web > web.txt]
"#;

fn publish_options(project: &TestProject, tags: TagOptions, facts: VcsFacts) -> PublishOptions {
  PublishOptions {
    registry: Arc::new(LocalRegistry::with_layers(project.layers_dir())),
    repository: format!("dir:{}", project.temp.path().join("registry").display()),
    tags,
    facts,
  }
}

#[tokio::test]
async fn build_and_publish_is_idempotent() {
  let project = TestProject::new(APP);
  let conveyor = project.conveyor(project.executor());
  let options = publish_options(&project, TagOptions::default(), VcsFacts::default());

  let (build, first) = conveyor.build_and_publish(&[], &options).await.unwrap();
  assert!(build.is_success());
  assert!(first.is_success());
  let statuses: Vec<PushStatus> = first.images.iter().flat_map(|i| i.tags.iter().map(|t| t.status)).collect();
  assert_eq!(statuses, [PushStatus::Pushed, PushStatus::Pushed]);

  let (_, second) = conveyor.build_and_publish(&[], &options).await.unwrap();
  let statuses: Vec<PushStatus> = second.images.iter().flat_map(|i| i.tags.iter().map(|t| t.status)).collect();
  assert_eq!(statuses, [PushStatus::Unchanged, PushStatus::Unchanged]);

  let web = second.image("web").unwrap();
  let remote = options.registry.resolve(&web.tags[0].target).await.unwrap().unwrap();
  assert_eq!(&remote.layer, build.image("web").unwrap().result.as_ref().unwrap());
  assert_eq!(remote.labels[LABEL_IMAGE], "web");
  assert_eq!(remote.labels[LABEL_TAG_STRATEGY], "custom");
  assert_eq!(remote.labels[LABEL_TAG_VALUE], "latest");
  assert_eq!(remote.labels[LABEL_STAGES_SIGNATURE], web.signature.as_ref().unwrap().as_str());
}

#[tokio::test]
async fn git_tag_wins_over_branch_for_tag_or_branch() {
  let project = TestProject::new(APP);
  let conveyor = project.conveyor(project.executor());
  let tags = TagOptions {
    tagging_strategy: Some(TaggingStrategy::TagOrBranch),
    ..TagOptions::default()
  };
  let facts = VcsFacts {
    tag: Some("v1.2.0".to_string()),
    branch: Some("main".to_string()),
    commit: None,
  };
  let options = publish_options(&project, tags, facts);

  let (_, report) = conveyor.build_and_publish(&["web".to_string()], &options).await.unwrap();

  assert!(report.image("base").is_none());
  let web = report.image("web").unwrap();
  assert_eq!(web.tags[0].tag.slug, "v1.2.0");
  let tags = options
    .registry
    .list_tags(&web.tags[0].target.repository)
    .await
    .unwrap();
  assert_eq!(tags, ["v1.2.0"]);
}

#[tokio::test]
async fn parent_change_changes_child_signature() {
  let project = TestProject::new(APP);
  let options = publish_options(&project, TagOptions::default(), VcsFacts::default());
  let (_, before) = project
    .conveyor(project.executor())
    .build_and_publish(&[], &options)
    .await
    .unwrap();

  project.write_file("conveyor.yaml", &APP.replace("echo base > base.txt", "echo base2 > base.txt"));
  let (_, after) = project
    .conveyor(project.executor())
    .build_and_publish(&[], &options)
    .await
    .unwrap();

  let web_before = before.image("web").unwrap();
  let web_after = after.image("web").unwrap();
  assert_ne!(web_before.signature, web_after.signature);
  assert_eq!(web_after.tags[0].status, PushStatus::Pushed);
}

#[tokio::test]
async fn publishing_without_build_reports_not_built() {
  let project = TestProject::new(APP);
  let conveyor = project.conveyor(project.executor());
  let options = publish_options(&project, TagOptions::default(), VcsFacts::default());

  let report = conveyor.publish_images(&["web".to_string()], &options).await.unwrap();

  assert!(matches!(report.image("web").unwrap().error, Some(PublishError::NotBuilt { .. })));
  let target = ImageRef::new(format!("{}/web", options.repository), "latest");
  assert!(options.registry.resolve(&target).await.unwrap().is_none());
}
