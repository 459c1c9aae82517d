//! Consumer-side setup without building: resolve a recipe's requirements,
//! write its generator files and run `imports()` into a directory.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::collect::import_artifacts;
use crate::consts::DEBUG_INFO_OPTION;
use crate::recipe::{ConfigView, Recipe, StageKind};
use crate::resolve::{LinkagePolicy, PackageSource, ResolvedDependencies, Resolver};
use crate::settings::{Settings, effective_build_type};

use super::generators::write_generators;
use super::types::{StageError, Step, StepFailure};

#[derive(Debug)]
pub struct InstallReport {
  pub resolved: ResolvedDependencies,
  pub generated: Vec<PathBuf>,
  pub imported: usize,
}

pub fn install(
  recipe: &Recipe,
  settings: &Settings,
  source: &dyn PackageSource,
  dest: &Path,
  policy: LinkagePolicy,
) -> Result<InstallReport, StageError> {
  run_install(recipe, settings, source, dest, policy).map_err(|f| StageError::at(Step::Configure, f))
}

fn run_install(
  recipe: &Recipe,
  settings: &Settings,
  source: &dyn PackageSource,
  dest: &Path,
  policy: LinkagePolicy,
) -> Result<InstallReport, StepFailure> {
  let resolved = Resolver::new(source).resolve_all(&recipe.requirements, settings, policy)?;

  let options = recipe.options.values();
  let build_type = effective_build_type(settings.build_type, recipe.options.is_true(DEBUG_INFO_OPTION));

  std::fs::create_dir_all(dest).map_err(StepFailure::io(format!("failed to create {}", dest.display())))?;
  let generated = write_generators(&recipe.generators, &resolved, build_type, dest)
    .map_err(StepFailure::io("failed to write generator files"))?;

  let view = ConfigView {
    settings: settings.clone(),
    options,
    build_type,
  };
  let record = recipe.stages.record(StageKind::Imports, &view)?;
  let imported = if record.rules.is_empty() {
    0
  } else {
    let roots: Vec<&Path> = resolved.all().iter().map(|d| d.root.as_path()).collect();
    import_artifacts(roots, &record.rules, dest)?.len()
  };

  info!(
    recipe = %recipe.name(),
    dependencies = resolved.len(),
    imported,
    dest = %dest.display(),
    "installed dependencies"
  );
  Ok(InstallReport {
    resolved,
    generated,
    imported,
  })
}
