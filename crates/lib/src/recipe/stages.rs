//! Stage callbacks and the actions they record.
//!
//! A stage callback never touches the filesystem or spawns processes itself.
//! It records [`StageAction`]s, copy rules and package metadata into a
//! [`StageRecord`], which the lifecycle executor then carries out.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::collect::ArtifactRule;
use crate::export::PackageInfo;
use crate::options::OptionValue;
use crate::recipe::RecipeError;
use crate::settings::{BuildType, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
  Source,
  Imports,
  Build,
  Package,
  PackageInfo,
}

impl StageKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Source => "source",
      Self::Imports => "imports",
      Self::Build => "build",
      Self::Package => "package",
      Self::PackageInfo => "package_info",
    }
  }
}

impl fmt::Display for StageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A side effect requested by a stage callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageAction {
  /// Run a shell command. `cwd` is relative to the stage's working directory.
  Run {
    command: String,
    cwd: Option<String>,
    env: BTreeMap<String, String>,
  },
  /// Clone a repository into `dir` (relative to the source folder).
  GitClone {
    url: String,
    rev: Option<String>,
    dir: Option<String>,
  },
  /// Configure a CMake project found under `source_folder`.
  CMakeConfigure {
    source_folder: Option<String>,
    definitions: BTreeMap<String, String>,
  },
  CMakeBuild { target: Option<String> },
}

impl StageAction {
  pub fn run(command: impl Into<String>) -> Self {
    Self::Run {
      command: command.into(),
      cwd: None,
      env: BTreeMap::new(),
    }
  }

  /// The stages in which this kind of action may be recorded.
  pub fn allowed_in(&self) -> &'static [StageKind] {
    match self {
      Self::Run { .. } => &[StageKind::Source, StageKind::Build],
      Self::GitClone { .. } => &[StageKind::Source],
      Self::CMakeConfigure { .. } | Self::CMakeBuild { .. } => &[StageKind::Build],
    }
  }
}

/// Everything a stage callback recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
  pub actions: Vec<StageAction>,
  pub rules: Vec<ArtifactRule>,
  pub info: PackageInfo,
}

/// The read-only configuration a stage callback can inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigView {
  pub settings: Settings,
  pub options: BTreeMap<String, OptionValue>,
  pub build_type: BuildType,
}

/// Produces the record for each stage of a recipe.
pub trait RecipeStages: Send + Sync + fmt::Debug {
  fn record(&self, stage: StageKind, view: &ConfigView) -> Result<StageRecord, RecipeError>;

  /// Stable text identifying the stage definitions, folded into the recipe
  /// revision.
  fn fingerprint(&self) -> String;
}

/// Stages declared as plain data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredStages {
  stages: HashMap<StageKind, StageRecord>,
}

impl DeclaredStages {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append an action to a stage. Fails when the action is not valid there.
  pub fn action(mut self, stage: StageKind, action: StageAction) -> Result<Self, RecipeError> {
    if !action.allowed_in().contains(&stage) {
      return Err(RecipeError::StageMisuse {
        stage,
        message: format!("{}() is not allowed here", action_name(&action)),
      });
    }
    self.stages.entry(stage).or_default().actions.push(action);
    Ok(self)
  }

  pub fn package_rule(mut self, rule: ArtifactRule) -> Self {
    self.stages.entry(StageKind::Package).or_default().rules.push(rule);
    self
  }

  pub fn import_rule(mut self, rule: ArtifactRule) -> Self {
    self.stages.entry(StageKind::Imports).or_default().rules.push(rule);
    self
  }

  pub fn info(mut self, info: PackageInfo) -> Self {
    self.stages.entry(StageKind::PackageInfo).or_default().info = info;
    self
  }
}

fn action_name(action: &StageAction) -> &'static str {
  match action {
    StageAction::Run { .. } => "run",
    StageAction::GitClone { .. } => "git_clone",
    StageAction::CMakeConfigure { .. } => "cmake_configure",
    StageAction::CMakeBuild { .. } => "cmake_build",
  }
}

impl RecipeStages for DeclaredStages {
  fn record(&self, stage: StageKind, _view: &ConfigView) -> Result<StageRecord, RecipeError> {
    Ok(self.stages.get(&stage).cloned().unwrap_or_default())
  }

  fn fingerprint(&self) -> String {
    let ordered: BTreeMap<_, _> = self.stages.iter().collect();
    serde_json::to_string(&ordered).unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn view() -> ConfigView {
    ConfigView {
      settings: Settings::detect(),
      options: BTreeMap::new(),
      build_type: BuildType::Release,
    }
  }

  #[test]
  fn declared_stages_return_recorded_data() {
    let stages = DeclaredStages::new()
      .action(StageKind::Build, StageAction::run("make"))
      .unwrap()
      .package_rule(ArtifactRule::new("*.h", "include"));

    let build = stages.record(StageKind::Build, &view()).unwrap();
    assert_eq!(build.actions, vec![StageAction::run("make")]);

    let package = stages.record(StageKind::Package, &view()).unwrap();
    assert_eq!(package.rules.len(), 1);

    let source = stages.record(StageKind::Source, &view()).unwrap();
    assert!(source.actions.is_empty());
  }

  #[test]
  fn cmake_is_rejected_outside_build() {
    let err = DeclaredStages::new()
      .action(StageKind::Source, StageAction::CMakeBuild { target: None })
      .unwrap_err();
    assert!(matches!(err, RecipeError::StageMisuse { stage: StageKind::Source, .. }));
  }

  #[test]
  fn fingerprint_is_stable() {
    let a = DeclaredStages::new()
      .action(StageKind::Source, StageAction::run("echo a"))
      .unwrap()
      .action(StageKind::Build, StageAction::run("echo b"))
      .unwrap();
    let b = a.clone();
    assert_eq!(a.fingerprint(), b.fingerprint());
  }
}
