//! Translation of recorded stage actions into tool invocations.

use std::path::{Path, PathBuf};

use crate::recipe::{StageAction, StageKind};
use crate::resolve::ResolvedDependencies;
use crate::settings::BuildType;

use super::runner::{Invocation, shell_command};

/// Environment variables every action sees.
pub const ENV_BUILD_TYPE: &str = "KILN_BUILD_TYPE";
pub const ENV_SOURCE_DIR: &str = "KILN_SOURCE_DIR";
pub const ENV_BUILD_DIR: &str = "KILN_BUILD_DIR";

/// What an action needs to know about the run it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ActionScope<'a> {
  pub stage: StageKind,
  pub source_dir: &'a Path,
  pub build_dir: &'a Path,
  pub build_type: BuildType,
  pub shared: bool,
  pub deps: &'a ResolvedDependencies,
  pub shell: Option<&'a str>,
}

impl ActionScope<'_> {
  /// Working directory for `run` actions of this stage.
  fn stage_dir(&self) -> &Path {
    match self.stage {
      StageKind::Source => self.source_dir,
      _ => self.build_dir,
    }
  }

  fn base(&self, program: impl Into<String>, cwd: impl Into<PathBuf>) -> Invocation {
    Invocation::new(program, cwd)
      .env(ENV_BUILD_TYPE, self.build_type.as_str())
      .env(ENV_SOURCE_DIR, self.source_dir.to_string_lossy())
      .env(ENV_BUILD_DIR, self.build_dir.to_string_lossy())
  }
}

/// The invocations carrying out `action`, in order.
pub fn invocations(action: &StageAction, scope: &ActionScope<'_>) -> Vec<Invocation> {
  match action {
    StageAction::Run { command, cwd, env } => {
      let dir = match cwd {
        Some(cwd) => scope.stage_dir().join(cwd),
        None => scope.stage_dir().to_path_buf(),
      };
      let (shell, args) = shell_command(scope.shell);
      let mut invocation = scope.base(shell, dir).args(args).arg(command);
      invocation.env.extend(env.clone());
      vec![invocation]
    }

    StageAction::GitClone { url, rev, dir } => {
      let dir = dir.clone().unwrap_or_else(|| repository_dir(url));
      let mut steps = vec![scope.base("git", scope.source_dir).args(["clone", url.as_str(), dir.as_str()])];
      if let Some(rev) = rev {
        steps.push(scope.base("git", scope.source_dir.join(&dir)).args(["checkout", rev.as_str()]));
      }
      steps
    }

    StageAction::CMakeConfigure {
      source_folder,
      definitions,
    } => {
      let source = match source_folder {
        Some(folder) => scope.source_dir.join(folder),
        None => scope.source_dir.to_path_buf(),
      };
      let mut args = vec![
        "-S".to_string(),
        source.to_string_lossy().to_string(),
        "-B".to_string(),
        scope.build_dir.to_string_lossy().to_string(),
        format!("-DCMAKE_BUILD_TYPE={}", scope.build_type),
        format!("-DBUILD_SHARED_LIBS={}", if scope.shared { "ON" } else { "OFF" }),
      ];
      let roots: Vec<_> = scope.deps.all().iter().map(|d| d.root.clone()).collect();
      if !roots.is_empty() {
        args.push(format!("-DCMAKE_PREFIX_PATH={}", join_paths(roots.iter())));
        args.push(format!("-DCMAKE_INCLUDE_PATH={}", join_paths(scope.deps.include_paths().iter())));
        args.push(format!("-DCMAKE_LIBRARY_PATH={}", join_paths(scope.deps.lib_paths().iter())));
      }
      args.extend(definitions.iter().map(|(k, v)| format!("-D{}={}", k, v)));
      vec![scope.base("cmake", scope.build_dir).args(args)]
    }

    StageAction::CMakeBuild { target } => {
      let mut invocation = scope.base("cmake", scope.build_dir).args([
        "--build".to_string(),
        scope.build_dir.to_string_lossy().to_string(),
        "--config".to_string(),
        scope.build_type.to_string(),
      ]);
      if let Some(target) = target {
        invocation = invocation.args(["--target", target.as_str()]);
      }
      vec![invocation]
    }
  }
}

/// The directory `git clone` creates for `url`.
fn repository_dir(url: &str) -> String {
  let last = url.trim_end_matches('/').rsplit(['/', ':']).next().unwrap_or(url);
  last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// CMake list syntax: `;`-separated, forward slashes.
fn join_paths<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> String {
  paths
    .map(|p| p.to_string_lossy().replace('\\', "/"))
    .collect::<Vec<_>>()
    .join(";")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  fn scope<'a>(stage: StageKind, deps: &'a ResolvedDependencies) -> ActionScope<'a> {
    ActionScope {
      stage,
      source_dir: Path::new("/work/source"),
      build_dir: Path::new("/work/build"),
      build_type: BuildType::RelWithDebInfo,
      shared: false,
      deps,
      shell: Some("/bin/sh"),
    }
  }

  #[test]
  fn run_uses_stage_directory_and_env() {
    let deps = ResolvedDependencies::default();
    let action = StageAction::Run {
      command: "make".into(),
      cwd: Some("sub".into()),
      env: BTreeMap::from([("CC".to_string(), "clang".to_string())]),
    };

    let steps = invocations(&action, &scope(StageKind::Build, &deps));

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].program, "/bin/sh");
    assert_eq!(steps[0].args, vec!["-c", "make"]);
    assert_eq!(steps[0].cwd, Path::new("/work/build/sub"));
    assert_eq!(steps[0].env.get("CC").map(String::as_str), Some("clang"));
    assert_eq!(steps[0].env.get(ENV_BUILD_TYPE).map(String::as_str), Some("RelWithDebInfo"));
  }

  #[test]
  fn git_clone_with_revision_checks_out() {
    let deps = ResolvedDependencies::default();
    let action = StageAction::GitClone {
      url: "https://github.com/maximMalofeev/ff_cpp.git".into(),
      rev: Some("v0.1".into()),
      dir: None,
    };

    let steps = invocations(&action, &scope(StageKind::Source, &deps));

    assert_eq!(steps.len(), 2);
    assert_eq!(
      steps[0].args,
      vec!["clone", "https://github.com/maximMalofeev/ff_cpp.git", "ff_cpp"]
    );
    assert_eq!(steps[1].cwd, Path::new("/work/source/ff_cpp"));
    assert_eq!(steps[1].args, vec!["checkout", "v0.1"]);
  }

  #[test]
  fn cmake_configure_passes_build_type_and_linkage() {
    let deps = ResolvedDependencies::default();
    let action = StageAction::CMakeConfigure {
      source_folder: Some("ff_cpp".into()),
      definitions: BTreeMap::from([("FF_TESTS".to_string(), "OFF".to_string())]),
    };

    let steps = invocations(&action, &scope(StageKind::Build, &deps));
    let args = &steps[0].args;

    assert_eq!(steps[0].program, "cmake");
    assert_eq!(&args[..4], &["-S", "/work/source/ff_cpp", "-B", "/work/build"]);
    assert!(args.contains(&"-DCMAKE_BUILD_TYPE=RelWithDebInfo".to_string()));
    assert!(args.contains(&"-DBUILD_SHARED_LIBS=OFF".to_string()));
    assert!(args.contains(&"-DFF_TESTS=OFF".to_string()));
    assert!(!args.iter().any(|a| a.starts_with("-DCMAKE_PREFIX_PATH")));
  }

  #[test]
  fn cmake_build_selects_config_and_target() {
    let deps = ResolvedDependencies::default();
    let action = StageAction::CMakeBuild {
      target: Some("ff_cpp".into()),
    };
    let steps = invocations(&action, &scope(StageKind::Build, &deps));
    assert_eq!(
      steps[0].args,
      vec!["--build", "/work/build", "--config", "RelWithDebInfo", "--target", "ff_cpp"]
    );
  }

  #[test]
  fn repository_dir_from_url() {
    assert_eq!(repository_dir("https://github.com/a/ff_cpp.git"), "ff_cpp");
    assert_eq!(repository_dir("git@github.com:a/b.git"), "b");
    assert_eq!(repository_dir("https://example.com/repo/"), "repo");
  }
}
