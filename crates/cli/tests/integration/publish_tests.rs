use predicates::prelude::*;

use std::path::Path;
use std::process::Command as StdCommand;

use super::common::{APP, TestEnv};

/// Turn `dir` into a git checkout whose HEAD carries `tag`.
fn tagged_checkout(dir: &Path, tag: &str) {
  let git = |args: &[&str]| {
    let status = StdCommand::new("git")
      .arg("-C")
      .arg(dir)
      .args(["-c", "user.name=conveyor", "-c", "user.email=conveyor@example.com"])
      .args(args)
      .status()
      .unwrap();
    assert!(status.success(), "git {:?} failed", args);
  };
  git(&["init", "--quiet"]);
  git(&["add", "."]);
  git(&["commit", "--quiet", "-m", "init"]);
  git(&["tag", tag]);
}

fn statuses(report: &serde_json::Value) -> Vec<String> {
  report
    .as_array()
    .unwrap()
    .iter()
    .flat_map(|image| image["tags"].as_array().unwrap().iter())
    .map(|tag| tag["status"].as_str().unwrap().to_string())
    .collect()
}

#[test]
fn publish_after_build_pushes_then_leaves_unchanged() {
  let env = TestEnv::new(APP);
  let repo = env.images_repo();
  env.json(&["build"]);

  let first = env.json(&["publish", "--images-repo", &repo]);
  assert_eq!(statuses(&first), ["pushed", "pushed"]);
  assert_eq!(first[0]["tags"][0]["tag"]["slug"], "latest");

  let second = env.json(&["publish", "--images-repo", &repo]);
  assert_eq!(statuses(&second), ["unchanged", "unchanged"]);
}

#[test]
fn publish_without_build_fails_per_image() {
  let env = TestEnv::new(APP);

  env
    .conveyor_cmd()
    .args(["publish", "--images-repo", &env.images_repo(), "web"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("1 image(s) failed to publish"));
}

#[test]
fn build_and_publish_with_branch_tag() {
  let env = TestEnv::new(APP);

  let report = env.json(&[
    "build-and-publish",
    "--images-repo",
    &env.images_repo(),
    "--tag-git-branch",
    "feature/Login",
  ]);
  let tags: Vec<&str> = report["publish"]
    .as_array()
    .unwrap()
    .iter()
    .map(|image| image["tags"][0]["tag"]["slug"].as_str().unwrap())
    .collect();
  assert_eq!(tags.len(), 2);
  assert!(tags.iter().all(|slug| *slug == tags[0]));
  assert!(!tags[0].contains('/'));
  assert!(report["build"].as_array().unwrap().iter().all(|i| i["status"] == "built"));
}

#[test]
fn tag_or_branch_uses_ci_tag() {
  let env = TestEnv::new(APP);

  let output = env
    .conveyor_cmd()
    .env("CI_COMMIT_TAG", "v1.0.0")
    .env("CI_COMMIT_REF_NAME", "main")
    .args([
      "build-and-publish",
      "--images-repo",
      &env.images_repo(),
      "--tagging-strategy",
      "tag-or-branch",
      "-o",
      "json",
    ])
    .output()
    .unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let tag = &report["publish"][0]["tags"][0]["tag"];
  assert_eq!(tag["strategy"], "git-tag");
  assert_eq!(tag["raw"], "v1.0.0");
}

#[test]
fn conflicting_tag_options_fail_before_publishing() {
  let env = TestEnv::new(APP);
  env.json(&["build"]);

  env
    .conveyor_cmd()
    .args([
      "publish",
      "--images-repo",
      &env.images_repo(),
      "--tag-custom",
      "stable",
      "--tag-git-commit",
      "abc123",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("conflicting tag strategies"));

  assert!(!env.temp.path().join("registry").join("shop").exists());
}

#[test]
fn tag_or_branch_ignores_git_tag_of_checkout_in_branch_pipeline() {
  let env = TestEnv::new(APP);
  tagged_checkout(&env.project_dir(), "v9.9.9");

  let output = env
    .conveyor_cmd()
    .env("CI_COMMIT_REF_NAME", "feature/login")
    .args([
      "build-and-publish",
      "--images-repo",
      &env.images_repo(),
      "--tagging-strategy",
      "tag-or-branch",
      "-o",
      "json",
    ])
    .output()
    .unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let tag = &report["publish"][0]["tags"][0]["tag"];
  assert_eq!(tag["strategy"], "git-branch");
  assert_eq!(tag["raw"], "feature/login");
}

#[test]
fn tag_or_branch_without_ci_env_fails_even_in_tagged_checkout() {
  let env = TestEnv::new(APP);
  tagged_checkout(&env.project_dir(), "v9.9.9");

  env
    .conveyor_cmd()
    .args([
      "build-and-publish",
      "--images-repo",
      &env.images_repo(),
      "--tagging-strategy",
      "tag-or-branch",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("CI_COMMIT_TAG"))
    .stderr(predicate::str::contains("CI_COMMIT_REF_NAME"));

  assert!(!env.temp.path().join("registry").join("shop").exists());
}
