//! Implementation of the `kiln info` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use kiln_lib::recipe::lua::load_recipe;

use super::recipe_path;
use crate::output::{OutputFormat, print_info, print_json, print_stat};

pub fn cmd_info(recipe: &Path, format: OutputFormat) -> Result<()> {
  let path = recipe_path(recipe);
  let recipe = load_recipe(&path).with_context(|| format!("Failed to load recipe: {}", path.display()))?;
  let meta = &recipe.metadata;

  let requires: Vec<String> = recipe.requirements.requires().iter().map(|r| r.to_string()).collect();
  let build_requires: Vec<String> = recipe
    .requirements
    .build_requires()
    .iter()
    .map(|r| r.to_string())
    .collect();
  let settings: Vec<&str> = recipe.settings.iter().map(|a| a.as_str()).collect();
  let generators: Vec<String> = recipe.generators.iter().map(|g| g.to_string()).collect();

  if format.is_json() {
    return print_json(&json!({
      "metadata": meta,
      "revision": recipe.revision().0,
      "settings": settings,
      "options": recipe.options.declarations().collect::<Vec<_>>(),
      "default_options": recipe.options.option_signature(),
      "requires": requires,
      "build_requires": build_requires,
      "generators": generators,
    }));
  }

  print_info(&format!("{}/{}", meta.name, meta.version));
  if let Some(ref description) = meta.description {
    print_stat("Description", description);
  }
  if let Some(ref license) = meta.license {
    print_stat("License", license);
  }
  if let Some(ref author) = meta.author {
    print_stat("Author", author);
  }
  if let Some(ref url) = meta.url {
    print_stat("URL", url);
  }
  print_stat("Revision", &recipe.revision().0);
  print_stat("Settings", &settings.join(", "));

  for decl in recipe.options.declarations() {
    let allowed: Vec<String> = decl.allowed.iter().map(|v| v.to_string()).collect();
    print_stat(
      &format!("Option {}", decl.key),
      &format!("[{}] default {}", allowed.join(", "), decl.default),
    );
  }
  if !requires.is_empty() {
    print_stat("Requires", &requires.join(", "));
  }
  if !build_requires.is_empty() {
    print_stat("Build requires", &build_requires.join(", "));
  }
  if !generators.is_empty() {
    print_stat("Generators", &generators.join(", "));
  }

  Ok(())
}
