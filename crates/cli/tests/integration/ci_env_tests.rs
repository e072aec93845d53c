use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn gitlab_tag_pipeline_exports_git_tag() {
  let env = TestEnv::empty();

  env
    .conveyor_cmd()
    .env("CI_COMMIT_TAG", "v2.1")
    .env("CI_COMMIT_REF_NAME", "v2.1")
    .env("CI_REGISTRY_IMAGE", "registry.example.com/team/shop")
    .args(["ci-env", "gitlab", "--tagging-strategy", "tag-or-branch"])
    .assert()
    .success()
    .stdout(predicate::str::contains("export CONVEYOR_TAG_GIT_TAG='v2.1'"))
    .stdout(predicate::str::contains(
      "export CONVEYOR_IMAGES_REPO='registry.example.com/team/shop'",
    ));
}

#[test]
fn gitlab_branch_pipeline_exports_git_branch() {
  let env = TestEnv::empty();

  env
    .conveyor_cmd()
    .env("CI_BUILD_REF_NAME", "main")
    .args(["ci-env", "gitlab", "--tagging-strategy", "tag-or-branch"])
    .assert()
    .success()
    .stdout(predicate::str::contains("export CONVEYOR_TAG_GIT_BRANCH='main'"))
    .stdout(predicate::str::contains("CONVEYOR_IMAGES_REPO").not());
}

#[test]
fn missing_ci_variables_fail() {
  let env = TestEnv::empty();

  env
    .conveyor_cmd()
    .args(["ci-env", "gitlab", "--tagging-strategy", "tag-or-branch"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("CI_COMMIT_REF_NAME"));
}
