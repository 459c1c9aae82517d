mod create;
mod info;
mod install;
mod list;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use kiln_lib::consts::RECIPE_FILENAME;
use kiln_lib::options::OptionValue;
use kiln_lib::recipe::Recipe;
use kiln_lib::recipe::lua::load_recipe;
use kiln_lib::settings::Settings;
use kiln_lib::settings::profile::Profile;

pub use create::{CreateArgs, cmd_create};
pub use info::cmd_info;
pub use install::{InstallArgs, cmd_install};
pub use list::cmd_list;

use crate::output::print_warning;

/// Settings and option overrides shared by `create` and `install`.
#[derive(Debug, Args)]
pub struct ConfigArgs {
  /// Path to a recipe file or a directory containing recipe.lua
  #[arg(default_value = ".")]
  pub recipe: PathBuf,

  /// Override a setting, e.g. -s build_type=Debug
  #[arg(short = 's', long = "setting", value_name = "KEY=VALUE", value_parser = parse_assignment)]
  pub settings: Vec<(String, String)>,

  /// Override an option, e.g. -o shared=true
  #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_assignment)]
  pub options: Vec<(String, String)>,

  /// Profile name (looked up in the profiles directory) or path to a profile file
  #[arg(short, long)]
  pub profile: Option<String>,
}

impl ConfigArgs {
  /// Load the recipe and apply profile then command-line overrides.
  pub fn load(&self) -> Result<(Recipe, Settings)> {
    let path = recipe_path(&self.recipe);
    let recipe = load_recipe(&path).with_context(|| format!("Failed to load recipe: {}", path.display()))?;

    let mut settings = Settings::detect();
    let mut overrides: BTreeMap<String, OptionValue> = BTreeMap::new();

    if let Some(ref name) = self.profile {
      let profile = Profile::load(name).with_context(|| format!("Failed to load profile: {}", name))?;
      profile.apply_settings(&mut settings)?;
      overrides.extend(profile.options);
    }

    for (key, value) in &self.settings {
      settings
        .set(key, value)
        .with_context(|| format!("Invalid setting: {}={}", key, value))?;
    }
    for (key, value) in &self.options {
      overrides.insert(key.clone(), OptionValue::parse(value));
    }

    let recipe = recipe
      .with_options(&overrides)
      .with_context(|| format!("Invalid options for {}", recipe.name()))?;
    Ok((recipe, settings))
  }
}

/// A directory argument means its recipe.lua.
pub fn recipe_path(arg: &Path) -> PathBuf {
  let path = if arg.is_dir() { arg.join(RECIPE_FILENAME) } else { arg.to_path_buf() };
  dunce::canonicalize(&path).unwrap_or(path)
}

/// Cancel `token` on the first Ctrl-C.
async fn cancel_on_ctrl_c(token: CancellationToken) {
  if tokio::signal::ctrl_c().await.is_ok() {
    print_warning("Interrupted, cancelling the running stage");
    token.cancel();
  }
}

fn parse_assignment(input: &str) -> Result<(String, String), String> {
  match input.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.trim().to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{}'", input)),
  }
}
