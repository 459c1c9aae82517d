//! Implementation of the `kiln list` command.

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::cache::PackageCache;

use crate::output::{OutputFormat, print_info, print_json, print_stat, truncate_hash};

#[derive(Serialize)]
struct ListedPackage<'a> {
  reference: String,
  package_id: &'a str,
  options: String,
  linkage: String,
  settings: &'a std::collections::BTreeMap<String, String>,
  path: String,
}

/// List published packages, optionally only those whose name contains `filter`.
pub fn cmd_list(filter: Option<&str>, format: OutputFormat) -> Result<()> {
  let cache = PackageCache::open_default();
  let packages = cache
    .list()
    .with_context(|| format!("Failed to read package cache: {}", cache.root().display()))?;

  let listed: Vec<ListedPackage> = packages
    .iter()
    .filter(|p| filter.is_none_or(|f| p.manifest.reference.name.contains(f)))
    .map(|p| ListedPackage {
      reference: p.manifest.reference.to_string(),
      package_id: &p.manifest.package_id.0,
      options: p.manifest.option_signature(),
      linkage: p.manifest.linkage.to_string(),
      settings: &p.manifest.settings,
      path: p.dir.display().to_string(),
    })
    .collect();

  if format.is_json() {
    return print_json(&listed);
  }

  if listed.is_empty() {
    print_info("No packages in cache");
    return Ok(());
  }

  for package in &listed {
    print_info(&format!("{} {}", package.reference, truncate_hash(package.package_id)));
    if !package.options.is_empty() {
      print_stat("Options", &package.options);
    }
    let settings: Vec<String> = package.settings.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    if !settings.is_empty() {
      print_stat("Settings", &settings.join(","));
    }
    print_stat("Linkage", &package.linkage);
  }

  Ok(())
}
