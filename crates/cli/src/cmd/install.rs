//! Implementation of the `kiln install` command.
//!
//! Resolves a recipe's requirements from the package cache, writes its
//! generator files and runs `imports()` into the destination directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use kiln_lib::cache::PackageCache;
use kiln_lib::execute::install;
use kiln_lib::resolve::LinkagePolicy;

use super::ConfigArgs;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, symbols};

#[derive(Debug, Args)]
pub struct InstallArgs {
  #[command(flatten)]
  pub config: ConfigArgs,

  /// Directory receiving generator files and imported artifacts
  #[arg(short, long, default_value = ".")]
  pub dest: PathBuf,

  /// Keep the first claimant instead of failing when dependencies disagree on linkage
  #[arg(long)]
  pub permissive: bool,

  #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
  pub format: OutputFormat,
}

#[derive(Serialize)]
struct InstallSummary {
  dependencies: Vec<DependencySummary>,
  generated: Vec<String>,
  imported: usize,
}

#[derive(Serialize)]
struct DependencySummary {
  reference: String,
  root: String,
  build_only: bool,
}

pub fn cmd_install(args: InstallArgs) -> Result<()> {
  let (recipe, settings) = args.config.load()?;
  let policy = if args.permissive {
    LinkagePolicy::Permissive
  } else {
    LinkagePolicy::Uniform
  };

  let cache = PackageCache::open_default();
  let report = install(&recipe, &settings, &cache, &args.dest, policy)
    .with_context(|| format!("Failed to install requirements of {}", recipe.name()))?;

  let summary = InstallSummary {
    dependencies: report
      .resolved
      .all()
      .iter()
      .map(|dep| DependencySummary {
        reference: dep.requirement.to_string(),
        root: dep.root.display().to_string(),
        build_only: dep.build_only,
      })
      .collect(),
    generated: report.generated.iter().map(|p| p.display().to_string()).collect(),
    imported: report.imported,
  };

  if args.format.is_json() {
    return print_json(&summary);
  }

  print_success(&format!(
    "Installed {} dependencies of {}",
    summary.dependencies.len(),
    recipe.name()
  ));
  for dep in &summary.dependencies {
    let marker = if dep.build_only { " (build)" } else { "" };
    print_info(&format!("{}{} {} {}", dep.reference, marker, symbols::ARROW, dep.root));
  }
  for path in &summary.generated {
    print_stat("Generated", path);
  }
  print_stat("Imported files", &summary.imported.to_string());

  Ok(())
}
