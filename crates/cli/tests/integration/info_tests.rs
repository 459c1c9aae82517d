//! Info command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn info_shows_metadata_and_options() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("hello.lua", "hello");

  env
    .kiln_cmd()
    .arg("info")
    .arg(&recipe)
    .assert()
    .success()
    .stdout(predicate::str::contains("hello/1.0"))
    .stdout(predicate::str::contains("A tiny static library"))
    .stdout(predicate::str::contains("Option shared: [true, false] default false"));
}

#[test]
fn info_json_lists_requirements() {
  let env = TestEnv::new();
  let recipe = env.add_recipe("consumer.lua", "consumer");

  let info = env.kiln_json(&["info", recipe.join("recipe.lua").to_str().unwrap()]);

  assert_eq!(info["metadata"]["name"], "consumer");
  assert_eq!(info["requires"], serde_json::json!(["hello/1.0@_/_"]));
  assert_eq!(info["generators"], serde_json::json!(["cmake", "json"]));
  assert!(!info["revision"].as_str().unwrap().is_empty());
}

#[test]
fn revision_is_stable_across_loads() {
  let env = TestEnv::new();
  let first = env.add_recipe("hello.lua", "a");
  let second = env.add_recipe("hello.lua", "b");

  let a = env.kiln_json(&["info", first.to_str().unwrap()]);
  let b = env.kiln_json(&["info", second.to_str().unwrap()]);

  assert_eq!(a["revision"], b["revision"]);
}

#[test]
fn info_missing_recipe_fails() {
  let env = TestEnv::new();

  env
    .kiln_cmd()
    .arg("info")
    .arg(env.temp.path().join("nowhere"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Failed to load recipe"));
}
