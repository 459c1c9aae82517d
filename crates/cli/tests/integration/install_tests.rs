//! Install command integration tests.
#![cfg(unix)]

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn install_writes_build_info_and_imports() {
  let env = TestEnv::new();
  let hello = env.add_recipe("hello.lua", "hello");
  let consumer = env.add_recipe("consumer.lua", "consumer");
  let dest = env.temp.path().join("out");

  env.kiln_cmd().arg("create").arg(&hello).assert().success();
  env
    .kiln_cmd()
    .arg("install")
    .arg(&consumer)
    .arg("--dest")
    .arg(&dest)
    .assert()
    .success()
    .stdout(predicate::str::contains("Installed 1 dependencies of consumer"));

  let cmake = std::fs::read_to_string(dest.join("kilnbuildinfo.cmake")).unwrap();
  assert!(cmake.contains("set(KILN_LIBS hello)"));
  assert!(cmake.contains("KILN_HELLO_ROOT"));
  assert!(dest.join("kilnbuildinfo.json").is_file());
  assert!(dest.join("deps/libhello.a").is_file());
}

#[test]
fn install_json_summary() {
  let env = TestEnv::new();
  let hello = env.add_recipe("hello.lua", "hello");
  let consumer = env.add_recipe("consumer.lua", "consumer");
  let dest = env.temp.path().join("out");

  env.kiln_cmd().arg("create").arg(&hello).assert().success();
  let summary = env.kiln_json(&["install", consumer.to_str().unwrap(), "--dest", dest.to_str().unwrap()]);

  assert_eq!(summary["dependencies"][0]["reference"], "hello/1.0@_/_");
  assert_eq!(summary["dependencies"][0]["build_only"], false);
  assert_eq!(summary["imported"], 1);
  assert_eq!(summary["generated"].as_array().unwrap().len(), 2);
}

#[test]
fn install_without_published_dependency_fails() {
  let env = TestEnv::new();
  let consumer = env.add_recipe("consumer.lua", "consumer");

  env
    .kiln_cmd()
    .arg("install")
    .arg(&consumer)
    .arg("--dest")
    .arg(env.temp.path().join("out"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("dependency not found: hello/1.0@_/_"));
}
