//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Two images, the second built on top of the first.
pub const APP: &str = r#"
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

/// Environment variables that would leak CI facts or settings into a test.
const INHERITED: &[&str] = &[
  "CI_COMMIT_TAG",
  "CI_BUILD_TAG",
  "CI_COMMIT_REF_NAME",
  "CI_BUILD_REF_NAME",
  "CI_COMMIT_SHA",
  "CI_REGISTRY_IMAGE",
  "CONVEYOR_DIR",
  "CONVEYOR_STAGES_STORAGE",
  "CONVEYOR_IMAGES_REPO",
  "CONVEYOR_TAG_CUSTOM",
  "CONVEYOR_TAG_GIT_BRANCH",
  "CONVEYOR_TAG_GIT_TAG",
  "CONVEYOR_TAG_GIT_COMMIT",
  "CONVEYOR_TAG_CONTENT_DIGEST",
  "CONVEYOR_TAGGING_STRATEGY",
  "CONVEYOR_SSH_KEY",
  "SSH_AUTH_SOCK",
  "RUST_LOG",
];

/// Isolated test environment.
///
/// Each test gets its own project, home (stages, layers, locks) and tmp dirs.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new(config: &str) -> Self {
    let env = Self::empty();
    env.write_file("project/conveyor.yaml", config);
    env
  }

  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("project")).unwrap();
    Self { temp }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn project_dir(&self) -> PathBuf {
    self.dir("project")
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self.dir("tmp")
  }

  /// `dir:` repository for published images.
  pub fn images_repo(&self) -> String {
    format!("dir:{}", self.dir("registry").join("shop").display())
  }

  /// `dir:` repository used as a remote stages storage.
  pub fn stages_repo(&self) -> String {
    format!("dir:{}", self.dir("registry").join("shop-stages").display())
  }

  /// A conveyor command isolated to this environment, using the dir backend.
  pub fn conveyor_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("conveyor");
    for name in INHERITED {
      cmd.env_remove(name);
    }
    cmd.env("CONVEYOR_DIR", self.project_dir());
    cmd.env("CONVEYOR_HOME", self.dir("home"));
    cmd.env("CONVEYOR_TMP_DIR", self.tmp_dir());
    cmd.env("CONVEYOR_BACKEND", "dir");
    cmd
  }

  /// Run a command and parse its stdout as JSON.
  pub fn json(&self, args: &[&str]) -> serde_json::Value {
    let output = self.conveyor_cmd().args(args).args(["-o", "json"]).output().unwrap();
    assert!(
      output.status.success(),
      "conveyor {:?} failed: {}",
      args,
      String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
  }
}
