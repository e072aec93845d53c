use predicates::prelude::*;

use super::common::{APP, TestEnv};

#[test]
fn build_reports_built_then_cached_stages() {
  let env = TestEnv::new(APP);

  let first = env.json(&["build"]);
  let images = first.as_array().unwrap();
  assert_eq!(images.len(), 2);
  for image in images {
    assert_eq!(image["status"], "built");
    assert!(image["stages"].as_array().unwrap().iter().any(|s| s["status"] == "miss"));
  }

  let second = env.json(&["build"]);
  for image in second.as_array().unwrap() {
    assert_eq!(image["status"], "built");
    assert!(image["stages"].as_array().unwrap().iter().all(|s| s["status"] == "hit"));
  }
  assert_eq!(first[1]["layer"], second[1]["layer"]);
}

#[test]
fn build_text_output_lists_images() {
  let env = TestEnv::new(APP);

  env
    .conveyor_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("base"))
    .stdout(predicate::str::contains("web"))
    .stdout(predicate::str::contains("Stages built"));
}

#[test]
fn build_selected_image_builds_its_parent_too() {
  let env = TestEnv::new(APP);

  let report = env.json(&["build", "web"]);
  let names: Vec<&str> = report
    .as_array()
    .unwrap()
    .iter()
    .map(|i| i["image"].as_str().unwrap())
    .collect();
  assert_eq!(names, ["base", "web"]);
}

#[test]
fn failing_instruction_fails_the_command() {
  let env = TestEnv::new(
    r#"
project: shop
images:
  - name: broken
    from: alpine:3.19
    shell:
      install: [exit 3]
"#,
  );

  env
    .conveyor_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("1 image(s) failed to build"));
}

#[test]
fn unknown_image_is_rejected() {
  let env = TestEnv::new(APP);

  env
    .conveyor_cmd()
    .args(["build", "api"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("api"));
}

#[test]
fn registry_stages_storage_is_shared_between_homes() {
  let first = TestEnv::new(APP);
  let stages = first.stages_repo();

  first
    .conveyor_cmd()
    .args(["--stages-storage", &stages, "build"])
    .assert()
    .success();

  // Same project and stages repository from a second home: every stage is found.
  let output = first
    .conveyor_cmd()
    .env("CONVEYOR_HOME", first.temp.path().join("home2"))
    .args(["--stages-storage", &stages, "build", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  for image in report.as_array().unwrap() {
    assert!(image["stages"].as_array().unwrap().iter().all(|s| s["status"] == "hit"));
  }
}

#[test]
fn stages_flush_forces_rebuild() {
  let env = TestEnv::new(APP);
  env.json(&["build"]);

  let flushed = env.json(&["stages", "flush"]);
  assert!(!flushed["removed"].as_array().unwrap().is_empty());

  let rebuilt = env.json(&["build"]);
  for image in rebuilt.as_array().unwrap() {
    assert!(image["stages"].as_array().unwrap().iter().any(|s| s["status"] == "miss"));
  }
}
