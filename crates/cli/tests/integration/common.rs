//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding recipes and a
/// private `KILN_HOME` (profiles, package cache and work trees).
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Copy a fixture to `<temp>/recipes/<dir>/recipe.lua` and return the directory.
  pub fn add_recipe(&self, fixture: &str, dir: &str) -> PathBuf {
    let recipe_dir = self.temp.path().join("recipes").join(dir);
    std::fs::create_dir_all(&recipe_dir).unwrap();
    std::fs::write(recipe_dir.join("recipe.lua"), fixture_content(fixture)).unwrap();
    recipe_dir
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// `KILN_HOME` for this test.
  pub fn home_path(&self) -> PathBuf {
    let p = self.temp.path().join("kiln");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Directory that per-run work trees are created under.
  pub fn work_path(&self) -> PathBuf {
    self.home_path().join("tmp").join("work")
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// `KILN_HOME` isolates profiles, the package cache and work trees.
  /// `KILN_CACHE` and `RUST_LOG` from the outer environment are cleared.
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.env("KILN_HOME", self.home_path());
    cmd.env_remove("KILN_CACHE");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Run `kiln <args> --format json` and parse stdout.
  pub fn kiln_json(&self, args: &[&str]) -> serde_json::Value {
    let output = self.kiln_cmd().args(args).args(["--format", "json"]).output().unwrap();
    assert!(
      output.status.success(),
      "kiln {:?} failed: {}",
      args,
      String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
  }
}
