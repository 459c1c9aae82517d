//! Build-system integration files describing the resolved dependencies.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::recipe::Generator;
use crate::resolve::ResolvedDependencies;
use crate::settings::BuildType;

pub const CMAKE_FILENAME: &str = "kilnbuildinfo.cmake";
pub const JSON_FILENAME: &str = "kilnbuildinfo.json";

#[derive(Serialize)]
struct BuildInfo<'a> {
  build_type: BuildType,
  include_paths: Vec<&'a Path>,
  lib_paths: Vec<&'a Path>,
  bin_paths: Vec<&'a Path>,
  libs: Vec<&'a str>,
  system_libs: Vec<&'a str>,
  defines: Vec<&'a str>,
  dependencies: Vec<DependencyInfo<'a>>,
}

#[derive(Serialize)]
struct DependencyInfo<'a> {
  name: &'a str,
  reference: String,
  root: &'a Path,
  include_paths: &'a [PathBuf],
  lib_paths: &'a [PathBuf],
  bin_paths: &'a [PathBuf],
  libs: &'a [String],
  build_only: bool,
}

/// Write the file for each generator into `build_dir` and return their paths.
pub fn write_generators(
  generators: &[Generator],
  deps: &ResolvedDependencies,
  build_type: BuildType,
  build_dir: &Path,
) -> std::io::Result<Vec<PathBuf>> {
  let mut written = Vec::with_capacity(generators.len());
  for generator in generators {
    let (name, content) = match generator {
      Generator::Cmake => (CMAKE_FILENAME, cmake_content(deps, build_type)),
      Generator::Json => (JSON_FILENAME, json_content(deps, build_type)?),
    };
    let path = build_dir.join(name);
    std::fs::write(&path, content)?;
    debug!(generator = %generator, path = %path.display(), "wrote build info");
    written.push(path);
  }
  Ok(written)
}

fn json_content(deps: &ResolvedDependencies, build_type: BuildType) -> std::io::Result<String> {
  let all = deps.all();
  let info = BuildInfo {
    build_type,
    include_paths: unique(all.iter().flat_map(|d| d.include_dirs.iter())),
    lib_paths: unique(all.iter().flat_map(|d| d.lib_dirs.iter())),
    bin_paths: unique(all.iter().flat_map(|d| d.bin_dirs.iter())),
    libs: deps.runtime().flat_map(|d| d.libs.iter().map(String::as_str)).collect(),
    system_libs: deps
      .runtime()
      .flat_map(|d| d.system_libs.iter().map(String::as_str))
      .collect(),
    defines: deps.runtime().flat_map(|d| d.defines.iter().map(String::as_str)).collect(),
    dependencies: all
      .iter()
      .map(|d| DependencyInfo {
        name: &d.requirement.name,
        reference: d.requirement.to_string(),
        root: &d.root,
        include_paths: &d.include_dirs,
        lib_paths: &d.lib_dirs,
        bin_paths: &d.bin_dirs,
        libs: &d.libs,
        build_only: d.build_only,
      })
      .collect(),
  };
  serde_json::to_string_pretty(&info).map_err(std::io::Error::other)
}

/// Paths in first-seen order without repeats.
fn unique<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> Vec<&'a Path> {
  let mut seen: Vec<&Path> = Vec::new();
  for path in paths {
    if !seen.contains(&path.as_path()) {
      seen.push(path);
    }
  }
  seen
}

fn cmake_path(path: &Path) -> String {
  format!("\"{}\"", path.to_string_lossy().replace('\\', "/"))
}

fn cmake_list<'a>(values: impl Iterator<Item = &'a str>) -> String {
  values.collect::<Vec<_>>().join(" ")
}

fn cmake_content(deps: &ResolvedDependencies, build_type: BuildType) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "# Generated by kiln. Do not edit.");
  let _ = writeln!(out, "set(KILN_BUILD_TYPE \"{}\")", build_type);

  for dep in deps.all() {
    let var = dep.requirement.name.to_uppercase().replace(['-', '.', '+'], "_");
    let _ = writeln!(out);
    let _ = writeln!(out, "set(KILN_{}_ROOT {})", var, cmake_path(&dep.root));
    let _ = writeln!(
      out,
      "set(KILN_INCLUDE_DIRS_{} {})",
      var,
      cmake_list(dep.include_dirs.iter().map(|p| p.to_str().unwrap_or_default()))
    );
    let _ = writeln!(
      out,
      "set(KILN_LIB_DIRS_{} {})",
      var,
      cmake_list(dep.lib_dirs.iter().map(|p| p.to_str().unwrap_or_default()))
    );
    let _ = writeln!(out, "set(KILN_LIBS_{} {})", var, cmake_list(dep.libs.iter().map(String::as_str)));
  }

  let all = deps.all();
  let _ = writeln!(out);
  let includes: Vec<String> = unique(all.iter().flat_map(|d| d.include_dirs.iter()))
    .into_iter()
    .map(cmake_path)
    .collect();
  let lib_dirs: Vec<String> = unique(all.iter().flat_map(|d| d.lib_dirs.iter()))
    .into_iter()
    .map(cmake_path)
    .collect();
  let _ = writeln!(out, "set(KILN_INCLUDE_DIRS {})", includes.join(" "));
  let _ = writeln!(out, "set(KILN_LIB_DIRS {})", lib_dirs.join(" "));
  let _ = writeln!(
    out,
    "set(KILN_LIBS {})",
    cmake_list(deps.runtime().flat_map(|d| d.libs.iter().map(String::as_str)))
  );
  let _ = writeln!(
    out,
    "set(KILN_SYSTEM_LIBS {})",
    cmake_list(deps.runtime().flat_map(|d| d.system_libs.iter().map(String::as_str)))
  );
  let _ = writeln!(
    out,
    "set(KILN_DEFINES {})",
    cmake_list(deps.runtime().flat_map(|d| d.defines.iter().map(String::as_str)))
  );

  let _ = writeln!(out);
  let _ = writeln!(out, "macro(kiln_basic_setup)");
  let _ = writeln!(out, "  include_directories(${{KILN_INCLUDE_DIRS}})");
  let _ = writeln!(out, "  link_directories(${{KILN_LIB_DIRS}})");
  let _ = writeln!(out, "  add_compile_definitions(${{KILN_DEFINES}})");
  let _ = writeln!(out, "endmacro()");
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::export::Linkage;
  use crate::requirement::RequirementSet;
  use crate::resolve::testing::MemorySource;
  use crate::resolve::{LinkagePolicy, Resolver};
  use crate::settings::Settings;
  use tempfile::TempDir;

  fn resolved() -> ResolvedDependencies {
    let source = MemorySource::default()
      .with("ffmpeg/4.2.1@bincrafters/stable", &["avcodec", "avformat"], Linkage::Static)
      .with("catch2/2.11.0", &[], Linkage::Static);
    let set = RequirementSet::parse(&["ffmpeg/4.2.1@bincrafters/stable"], &["catch2/2.11.0"]).unwrap();
    Resolver::new(&source)
      .resolve_all(&set, &Settings::detect(), LinkagePolicy::Uniform)
      .unwrap()
  }

  #[test]
  fn cmake_file_lists_dependencies() {
    let dir = TempDir::new().unwrap();
    let written = write_generators(&[Generator::Cmake], &resolved(), BuildType::Debug, dir.path()).unwrap();

    assert_eq!(written, vec![dir.path().join(CMAKE_FILENAME)]);
    let content = std::fs::read_to_string(&written[0]).unwrap();
    assert!(content.contains("set(KILN_BUILD_TYPE \"Debug\")"));
    assert!(content.contains("set(KILN_LIBS_FFMPEG avcodec avformat)"));
    assert!(content.contains("set(KILN_LIBS avcodec avformat)"));
    assert!(content.contains("KILN_CATCH2_ROOT"));
    assert!(content.contains("macro(kiln_basic_setup)"));
  }

  #[test]
  fn json_file_separates_build_only() {
    let dir = TempDir::new().unwrap();
    write_generators(&[Generator::Json], &resolved(), BuildType::Release, dir.path()).unwrap();

    let content = std::fs::read_to_string(dir.path().join(JSON_FILENAME)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(value["build_type"], "Release");
    assert_eq!(value["libs"], serde_json::json!(["avcodec", "avformat"]));
    assert_eq!(value["dependencies"][1]["build_only"], true);
    assert_eq!(value["include_paths"].as_array().unwrap().len(), 2);
  }

  #[test]
  fn no_generators_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let written = write_generators(&[], &resolved(), BuildType::Release, dir.path()).unwrap();
    assert!(written.is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }
}
