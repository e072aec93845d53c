use predicates::prelude::*;

use super::common::TestEnv;

/// Owner record of a process that cannot be running.
const DEAD_OWNER: &str = r#"{"pid":1073741808,"created_at":0}"#;

#[test]
fn gc_with_empty_tmp_succeeds() {
  let env = TestEnv::empty();

  env
    .conveyor_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_dry_run_keeps_abandoned_dirs() {
  let env = TestEnv::empty();
  let abandoned = env.tmp_dir().join("project-abandoned");
  std::fs::create_dir_all(&abandoned).unwrap();
  std::fs::write(abandoned.join("owner.json"), DEAD_OWNER).unwrap();

  env
    .conveyor_cmd()
    .args(["gc", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));
  assert!(abandoned.exists());

  let result = env.json(&["gc"]);
  assert_eq!(result["stats"]["removed"], 1);
  assert!(!abandoned.exists());
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::empty();

  env
    .conveyor_cmd()
    .args(["gc", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("bytes_freed"))
    .stdout(predicate::str::contains("removed_paths"));
}
