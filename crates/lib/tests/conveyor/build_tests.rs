use conveyor_lib::config::StageName;
use conveyor_lib::conveyor::{CacheStatus, ConveyorError, StageFailure};
use conveyor_lib::executor::{DirExecutor, ExecuteError};
use conveyor_lib::storage::StagesStorage;

use super::common::TestProject;

const WEB: &str = r#"
project: demo
images:
  - name: web
    from: alpine:3.19
    shell:
      install:
        - mkdir -p srv
        - cp "$CONVEYOR_PROJECT_DIR/index.html" srv/index.html
      setup:
        - echo ready > srv/status
    dependencies:
      install: [index.html]
"#;

#[tokio::test]
async fn clean_build_then_rebuild_from_cache() {
  let project = TestProject::new(WEB);
  project.write_file("index.html", "<h1>hello</h1>\n");
  let executor = project.executor();
  let conveyor = project.conveyor(executor.clone());

  let first = conveyor.build(&[]).await.unwrap();
  let web = first.image("web").unwrap();
  assert_eq!(web.count(CacheStatus::Miss), 3);
  assert_eq!(executor.count(), 3);

  let layer = web.result.as_ref().unwrap();
  let rootfs = DirExecutor::new(project.layers_dir()).layer_path(layer).unwrap();
  assert_eq!(std::fs::read_to_string(rootfs.join("srv/index.html")).unwrap(), "<h1>hello</h1>\n");
  assert_eq!(std::fs::read_to_string(rootfs.join("srv/status")).unwrap(), "ready\n");

  let second = project.conveyor(executor.clone()).build(&[]).await.unwrap();
  let web_again = second.image("web").unwrap();
  assert_eq!(web_again.count(CacheStatus::Hit), 3);
  assert_eq!(executor.count(), 3);
  assert_eq!(web_again.result.as_ref().unwrap(), layer);
}

#[tokio::test]
async fn dependency_change_rebuilds_from_the_dependent_stage() {
  let project = TestProject::new(WEB);
  project.write_file("index.html", "v1\n");
  let executor = project.executor();
  project.conveyor(executor.clone()).build(&[]).await.unwrap();

  project.write_file("index.html", "v2\n");
  let report = project.conveyor(executor.clone()).build(&[]).await.unwrap();

  let statuses: Vec<(StageName, CacheStatus)> = report
    .image("web")
    .unwrap()
    .stages
    .iter()
    .map(|s| (s.stage, s.status))
    .collect();
  assert_eq!(
    statuses,
    [
      (StageName::From, CacheStatus::Hit),
      (StageName::Install, CacheStatus::Miss),
      (StageName::Setup, CacheStatus::Miss),
    ]
  );
  assert_eq!(executor.count(), 5);
}

#[tokio::test]
async fn concurrent_builders_share_one_execution_per_stage() {
  let project = TestProject::new(WEB);
  project.write_file("index.html", "shared\n");
  let executor = project.executor();
  let a = project.conveyor(executor.clone());
  let b = project.conveyor(executor.clone());

  let (first, second) = tokio::join!(a.build(&[]), b.build(&[]));
  let (first, second) = (first.unwrap(), second.unwrap());

  assert_eq!(executor.count(), 3);
  assert_eq!(
    first.image("web").unwrap().result.as_ref().unwrap(),
    second.image("web").unwrap().result.as_ref().unwrap()
  );
  assert_eq!(project.storage().list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn failing_instruction_stores_nothing_for_that_stage() {
  let project = TestProject::new(
    r#"
project: demo
images:
  - name: web
    from: alpine:3.19
    shell:
      install: ["echo partial > f", "exit 3"]
"#,
  );
  let executor = project.executor();

  let report = project.conveyor(executor).build(&[]).await.unwrap();

  let err = report.image("web").unwrap().result.as_ref().unwrap_err();
  assert_eq!(err.stage, StageName::Install);
  assert!(matches!(
    err.source,
    StageFailure::Execute(ExecuteError::InstructionFailed { code: Some(3), .. })
  ));
  assert_eq!(project.storage().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_dependency_fails_the_image() {
  let project = TestProject::new(WEB);
  let executor = project.executor();

  let report = project.conveyor(executor.clone()).build(&[]).await.unwrap();

  let err = report.image("web").unwrap().result.as_ref().unwrap_err();
  assert!(matches!(err.source, StageFailure::Signature(_)));
  assert_eq!(executor.count(), 0);
}

#[tokio::test]
async fn unknown_image_is_rejected() {
  let project = TestProject::new(WEB);
  project.write_file("index.html", "x\n");

  let err = project
    .conveyor(project.executor())
    .build(&["api".to_string()])
    .await
    .unwrap_err();
  assert!(matches!(err, ConveyorError::UnknownImages(names) if names == ["api"]));
}

#[tokio::test]
async fn flush_forces_a_full_rebuild() {
  let project = TestProject::new(WEB);
  project.write_file("index.html", "x\n");
  let executor = project.executor();
  let conveyor = project.conveyor(executor.clone());
  conveyor.build(&[]).await.unwrap();

  let flushed = conveyor.flush_stages().await.unwrap();
  assert_eq!(flushed.removed.len(), 3);

  let rebuilt = conveyor.build(&[]).await.unwrap();
  assert_eq!(rebuilt.image("web").unwrap().count(CacheStatus::Miss), 3);
  assert_eq!(executor.count(), 6);
}
