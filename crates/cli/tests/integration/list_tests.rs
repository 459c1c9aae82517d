//! List command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn empty_cache() {
  let env = TestEnv::new();

  env
    .kiln_cmd()
    .arg("list")
    .assert()
    .success()
    .stdout(predicate::str::contains("No packages in cache"));

  assert_eq!(env.kiln_json(&["list"]), serde_json::json!([]));
}

#[cfg(unix)]
#[test]
fn lists_and_filters_published_packages() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");
  env.kiln_cmd().arg("create").arg(&recipe).assert().success();

  env
    .kiln_cmd()
    .arg("list")
    .assert()
    .success()
    .stdout(predicate::str::contains("hello/1.0@_/_"))
    .stdout(predicate::str::contains("Options: shared=false"));

  env
    .kiln_cmd()
    .args(["list", "hel"])
    .assert()
    .success()
    .stdout(predicate::str::contains("hello/1.0@_/_"));

  env
    .kiln_cmd()
    .args(["list", "zlib"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No packages in cache"));
}
