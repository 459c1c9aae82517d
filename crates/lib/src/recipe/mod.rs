//! Recipes: immutable, versioned descriptions of how to produce a package.
//!
//! A recipe owns one [`RequirementSet`], one [`OptionMatrix`], the settings
//! axes it is sensitive to, the generators it wants, and its stage callbacks.
//! Its revision is a hash of the whole definition, so two differing
//! definitions of the same `name/version` never share a revision.

pub mod lua;
pub mod stages;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::options::{OptionDecl, OptionError, OptionMatrix, OptionValue};
use crate::requirement::{Channel, Requirement, RequirementError, RequirementSet};
use crate::settings::{SettingAxis, SettingsError};
use crate::util::hash::{Hashable, ObjectHash};

pub use stages::{ConfigView, DeclaredStages, RecipeStages, StageAction, StageKind, StageRecord};

#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("failed to read recipe {path}: {message}")]
  Load { path: String, message: String },

  #[error("invalid recipe: {0}")]
  Invalid(String),

  #[error(transparent)]
  Requirement(#[from] RequirementError),

  #[error(transparent)]
  Options(#[from] OptionError),

  #[error(transparent)]
  Settings(#[from] SettingsError),

  #[error("{stage}(): {message}")]
  StageMisuse { stage: StageKind, message: String },

  #[error("{stage}() failed: {source}")]
  Stage {
    stage: StageKind,
    #[source]
    source: mlua::Error,
  },

  #[error("lua error: {0}")]
  Lua(#[from] mlua::Error),
}

/// Build-system integration files written during configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
  Cmake,
  Json,
}

impl FromStr for Generator {
  type Err = RecipeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cmake" => Ok(Self::Cmake),
      "json" => Ok(Self::Json),
      other => Err(RecipeError::Invalid(format!(
        "unknown generator '{}' (expected cmake or json)",
        other
      ))),
    }
  }
}

impl fmt::Display for Generator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Cmake => write!(f, "cmake"),
      Self::Json => write!(f, "json"),
    }
  }
}

/// Descriptive fields. None of them affect behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMetadata {
  pub name: String,
  pub version: String,
  pub license: Option<String>,
  pub author: Option<String>,
  pub url: Option<String>,
  pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Recipe {
  pub metadata: RecipeMetadata,
  pub settings: Vec<SettingAxis>,
  pub options: OptionMatrix,
  pub requirements: RequirementSet,
  pub generators: Vec<Generator>,
  pub stages: Arc<dyn RecipeStages>,
  revision: ObjectHash,
}

/// The hashed form of a recipe definition.
#[derive(Serialize)]
struct RecipeDefinition<'a> {
  metadata: &'a RecipeMetadata,
  settings: &'a [SettingAxis],
  options: Vec<&'a OptionDecl>,
  requirements: &'a RequirementSet,
  generators: &'a [Generator],
  stages: String,
}

impl Hashable for RecipeDefinition<'_> {}

impl Recipe {
  pub fn builder(name: impl Into<String>, version: impl Into<String>) -> RecipeBuilder {
    RecipeBuilder::new(name, version)
  }

  pub fn name(&self) -> &str {
    &self.metadata.name
  }

  pub fn version(&self) -> &str {
    &self.metadata.version
  }

  pub fn revision(&self) -> &ObjectHash {
    &self.revision
  }

  /// The reference this recipe publishes under in `channel`.
  pub fn reference(&self, channel: Channel) -> Requirement {
    Requirement::new(&self.metadata.name, &self.metadata.version, channel)
  }

  /// A copy of this recipe with option overrides applied. The revision is
  /// unchanged since the definition is the same.
  pub fn with_options(&self, overrides: &BTreeMap<String, OptionValue>) -> Result<Self, RecipeError> {
    let mut recipe = self.clone();
    recipe.options = self.options.with_overrides(overrides)?;
    Ok(recipe)
  }
}

pub struct RecipeBuilder {
  metadata: RecipeMetadata,
  settings: Vec<SettingAxis>,
  options: Vec<OptionDecl>,
  requires: Vec<String>,
  build_requires: Vec<String>,
  generators: Vec<Generator>,
  stages: Arc<dyn RecipeStages>,
}

impl RecipeBuilder {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      metadata: RecipeMetadata {
        name: name.into(),
        version: version.into(),
        ..Default::default()
      },
      settings: SettingAxis::ALL.to_vec(),
      options: Vec::new(),
      requires: Vec::new(),
      build_requires: Vec::new(),
      generators: Vec::new(),
      stages: Arc::new(DeclaredStages::new()),
    }
  }

  pub fn metadata(mut self, metadata: RecipeMetadata) -> Self {
    let (name, version) = (self.metadata.name, self.metadata.version);
    self.metadata = RecipeMetadata {
      name,
      version,
      ..metadata
    };
    self
  }

  pub fn settings(mut self, axes: Vec<SettingAxis>) -> Self {
    self.settings = axes;
    self
  }

  pub fn option(mut self, decl: OptionDecl) -> Self {
    self.options.push(decl);
    self
  }

  pub fn requires(mut self, req: impl Into<String>) -> Self {
    self.requires.push(req.into());
    self
  }

  pub fn build_requires(mut self, req: impl Into<String>) -> Self {
    self.build_requires.push(req.into());
    self
  }

  pub fn generator(mut self, generator: Generator) -> Self {
    self.generators.push(generator);
    self
  }

  pub fn stages(mut self, stages: impl RecipeStages + 'static) -> Self {
    self.stages = Arc::new(stages);
    self
  }

  /// Validate everything and compute the revision.
  pub fn build(self) -> Result<Recipe, RecipeError> {
    // The recipe's own name/version must form a valid reference.
    Requirement::parse(&format!("{}/{}", self.metadata.name, self.metadata.version))?;

    let requirements = RequirementSet::parse(&self.requires, &self.build_requires)?;
    let options = OptionMatrix::new(self.options, BTreeMap::new())?;

    let revision = RecipeDefinition {
      metadata: &self.metadata,
      settings: &self.settings,
      options: options.declarations().collect(),
      requirements: &requirements,
      generators: &self.generators,
      stages: self.stages.fingerprint(),
    }
    .compute_hash()
    .map_err(|e| RecipeError::Invalid(format!("failed to hash recipe: {}", e)))?;

    Ok(Recipe {
      metadata: self.metadata,
      settings: self.settings,
      options,
      requirements,
      generators: self.generators,
      stages: self.stages,
      revision,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ff_builder() -> RecipeBuilder {
    Recipe::builder("ff_cpp", "0.1.0")
      .option(OptionDecl::boolean("shared", false))
      .requires("ffmpeg/4.2.1@bincrafters/stable")
      .requires("sdl2/2.0.10@bincrafters/stable")
      .build_requires("catch2/2.11.0")
      .generator(Generator::Cmake)
  }

  #[test]
  fn builds_valid_recipe() {
    let recipe = ff_builder().build().unwrap();
    assert_eq!(recipe.name(), "ff_cpp");
    assert_eq!(recipe.requirements.requires().len(), 2);
    assert_eq!(recipe.requirements.build_requires().len(), 1);
    assert_eq!(recipe.settings.len(), 4);
  }

  #[test]
  fn duplicate_requirement_fails_construction() {
    let err = ff_builder().requires("ffmpeg/4.3@bincrafters/stable").build().unwrap_err();
    assert!(matches!(
      err,
      RecipeError::Requirement(RequirementError::DuplicateRequirement { .. })
    ));
  }

  #[test]
  fn revision_changes_with_definition() {
    let a = ff_builder().build().unwrap();
    let b = ff_builder().build().unwrap();
    let c = ff_builder().generator(Generator::Json).build().unwrap();
    assert_eq!(a.revision(), b.revision());
    assert_ne!(a.revision(), c.revision());
  }

  #[test]
  fn option_overrides_keep_revision() {
    let recipe = ff_builder().build().unwrap();
    let overrides = BTreeMap::from([("shared".to_string(), OptionValue::Bool(true))]);
    let shared = recipe.with_options(&overrides).unwrap();
    assert!(shared.options.is_true("shared"));
    assert_eq!(shared.revision(), recipe.revision());
  }

  #[test]
  fn unknown_generator_is_invalid() {
    assert!(matches!("premake".parse::<Generator>(), Err(RecipeError::Invalid(_))));
  }
}
