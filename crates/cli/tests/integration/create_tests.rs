//! Create command integration tests.
//!
//! Fixture recipes run POSIX shell commands.
#![cfg(unix)]

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn create_publishes_package() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  env
    .kiln_cmd()
    .arg("create")
    .arg(&recipe)
    .assert()
    .success()
    .stdout(predicate::str::contains("Created hello/1.0@_/_"))
    .stdout(predicate::str::contains("Libraries: hello"));

  let listed = env.kiln_json(&["list"]);
  assert_eq!(listed.as_array().unwrap().len(), 1);
  let path = listed[0]["path"].as_str().unwrap();
  assert!(std::path::Path::new(path).join("include/hello.h").is_file());
  assert!(std::path::Path::new(path).join("lib/libhello.a").is_file());
  assert!(std::path::Path::new(path).join("kiln-manifest.json").is_file());
}

#[test]
fn create_twice_leaves_cache_untouched() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  env.kiln_cmd().arg("create").arg(&recipe).assert().success();
  env
    .kiln_cmd()
    .arg("create")
    .arg(&recipe)
    .assert()
    .success()
    .stdout(predicate::str::contains("already in cache"));

  assert_eq!(env.kiln_json(&["list"]).as_array().unwrap().len(), 1);
}

#[test]
fn create_json_reports_manifest() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  let report = env.kiln_json(&["create", recipe.to_str().unwrap()]);

  assert_eq!(report["reference"], "hello/1.0@_/_");
  assert_eq!(report["already_present"], false);
  assert_eq!(report["manifest"]["library_names"], serde_json::json!(["hello"]));
  assert_eq!(report["manifest"]["linkage"], "static");
  assert_eq!(report["manifest"]["settings"]["build_type"], "Release");
  assert_eq!(report["package_id"], report["manifest"]["package_id"]);
}

#[test]
fn create_under_channel() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  env
    .kiln_cmd()
    .arg("create")
    .arg(&recipe)
    .args(["--user", "demo", "--channel", "testing"])
    .assert()
    .success()
    .stdout(predicate::str::contains("hello/1.0@demo/testing"));
}

#[test]
fn user_without_channel_is_rejected() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  env
    .kiln_cmd()
    .arg("create")
    .arg(&recipe)
    .args(["--user", "demo"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--channel"));
}

#[test]
fn setting_override_changes_build_type() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  let report = env.kiln_json(&["create", recipe.to_str().unwrap(), "-s", "build_type=Debug"]);

  assert_eq!(report["manifest"]["settings"]["build_type"], "Debug");
  let lib = std::path::Path::new(report["path"].as_str().unwrap()).join("lib/libhello.a");
  assert_eq!(std::fs::read_to_string(lib).unwrap().trim(), "Debug");
}

#[test]
fn option_override_is_a_separate_package() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");
  let recipe = recipe.to_str().unwrap();

  let static_build = env.kiln_json(&["create", recipe]);
  let shared_build = env.kiln_json(&["create", recipe, "-o", "shared=true"]);

  assert_ne!(static_build["package_id"], shared_build["package_id"]);
  assert_eq!(shared_build["manifest"]["linkage"], "shared");
  assert_eq!(env.kiln_json(&["list"]).as_array().unwrap().len(), 2);
}

#[test]
fn invalid_option_value_fails() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  env
    .kiln_cmd()
    .arg("create")
    .arg(&recipe)
    .args(["-o", "shared=maybe"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("invalid value 'maybe' for option 'shared'"));
}

#[test]
fn profile_supplies_settings() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");
  std::fs::create_dir_all(env.home_path().join("profiles")).unwrap();
  std::fs::write(
    env.home_path().join("profiles/debug.toml"),
    "[settings]\nbuild_type = \"Debug\"\n\n[options]\nshared = true\n",
  )
  .unwrap();

  let report = env.kiln_json(&["create", recipe.to_str().unwrap(), "--profile", "debug"]);

  assert_eq!(report["manifest"]["settings"]["build_type"], "Debug");
  assert_eq!(report["manifest"]["linkage"], "shared");
}

#[test]
fn command_line_wins_over_profile() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");
  let profile = env.write_file("debug.toml", "[settings]\nbuild_type = \"Debug\"\n");

  let report = env.kiln_json(&[
    "create",
    recipe.to_str().unwrap(),
    "--profile",
    profile.to_str().unwrap(),
    "-s",
    "build_type=MinSizeRel",
  ]);

  assert_eq!(report["manifest"]["settings"]["build_type"], "MinSizeRel");
}

#[test]
fn build_failure_names_stage() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("broken_build.lua", "broken");

  env
    .kiln_cmd()
    .arg("create")
    .arg(&recipe)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("build error"))
    .stderr(predicate::str::contains("compiler exploded"));

  env
    .kiln_cmd()
    .arg("list")
    .assert()
    .success()
    .stdout(predicate::str::contains("No packages in cache"));
}

#[test]
fn undeclared_library_fails_publish() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("missing_lib.lua", "ghost");

  env
    .kiln_cmd()
    .arg("create")
    .arg(&recipe)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("publish error"))
    .stderr(predicate::str::contains("library 'ghost'"));
}

#[test]
fn work_tree_removed_unless_kept() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  env.kiln_cmd().arg("create").arg(&recipe).assert().success();
  let count = std::fs::read_dir(env.work_path()).map(|d| d.count()).unwrap_or(0);
  assert_eq!(count, 0);

  env
    .kiln_cmd()
    .arg("create")
    .arg(&recipe)
    .arg("--keep-workdir")
    .assert()
    .success();
  let kept: Vec<_> = std::fs::read_dir(env.work_path()).unwrap().collect();
  assert_eq!(kept.len(), 1);
  let root = kept[0].as_ref().unwrap().path();
  assert!(root.join("build/out/libhello.a").is_file());
}
