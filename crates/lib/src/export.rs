//! Consumer metadata: the manifest a published package carries.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::collect::PackageLayout;
use crate::options::{OptionValue, signature_of};
use crate::requirement::Requirement;
use crate::util::hash::{HashError, Hashable, ObjectHash};

#[derive(Debug, Error)]
pub enum ExportError {
  #[error("library '{name}' is declared but no binary artifact provides it (looked for {candidates})")]
  UnresolvedLibraryName { name: String, candidates: String },

  #[error("failed to compute package id: {0}")]
  Hash(#[from] HashError),
}

/// How a package's libraries are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
  Static,
  Shared,
}

impl Linkage {
  pub fn from_shared(shared: bool) -> Self {
    if shared { Self::Shared } else { Self::Static }
  }
}

impl std::fmt::Display for Linkage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Static => write!(f, "static"),
      Self::Shared => write!(f, "shared"),
    }
  }
}

/// What `package_info()` declares about the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
  pub libs: Vec<String>,
  pub defines: Vec<String>,
  pub system_libs: Vec<String>,
  pub include_dirs: Vec<String>,
  pub lib_dirs: Vec<String>,
  pub bin_dirs: Vec<String>,
}

impl Default for PackageInfo {
  fn default() -> Self {
    Self {
      libs: Vec::new(),
      defines: Vec::new(),
      system_libs: Vec::new(),
      include_dirs: vec!["include".to_string()],
      lib_dirs: vec!["lib".to_string()],
      bin_dirs: vec!["bin".to_string()],
    }
  }
}

/// Everything that distinguishes one binary package from another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
  pub reference: Requirement,
  pub recipe_revision: ObjectHash,
  pub settings: BTreeMap<String, String>,
  pub options: BTreeMap<String, OptionValue>,
  pub requires: Vec<Requirement>,
}

impl Hashable for PackageIdentity {}

impl PackageIdentity {
  pub fn package_id(&self) -> Result<ObjectHash, HashError> {
    self.compute_hash()
  }

  pub fn option_signature(&self) -> String {
    signature_of(&self.options)
  }

  /// Key serializing concurrent publishes of the same package.
  pub fn lock_key(&self) -> String {
    format!("{}:{}", self.reference, self.option_signature())
  }

  pub fn linkage(&self) -> Linkage {
    let shared = self
      .options
      .get(crate::consts::SHARED_OPTION)
      .and_then(OptionValue::as_bool)
      .unwrap_or(false);
    Linkage::from_shared(shared)
  }
}

/// Metadata consumers use to compile and link against a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
  pub reference: Requirement,
  pub package_id: ObjectHash,
  pub recipe_revision: ObjectHash,
  pub library_names: Vec<String>,
  pub include_dirs: Vec<String>,
  pub lib_dirs: Vec<String>,
  pub bin_dirs: Vec<String>,
  pub binary_artifacts: Vec<String>,
  pub requires: Vec<Requirement>,
  pub settings: BTreeMap<String, String>,
  pub options: BTreeMap<String, OptionValue>,
  pub linkage: Linkage,
  pub defines: Vec<String>,
  pub system_libs: Vec<String>,
  pub created_at_unix: u64,
}

impl PackageManifest {
  pub fn option_signature(&self) -> String {
    signature_of(&self.options)
  }
}

/// File names that can provide library `name`.
pub fn library_candidates(name: &str) -> Vec<String> {
  vec![
    format!("lib{}.a", name),
    format!("{}.a", name),
    format!("{}.lib", name),
    format!("lib{}.lib", name),
    format!("lib{}.so", name),
    format!("{}.so", name),
    format!("lib{}.so.N", name),
    format!("lib{}.dylib", name),
    format!("{}.dylib", name),
    format!("{}.dll", name),
    format!("lib{}.dll", name),
  ]
}

fn provides(file_name: &str, name: &str) -> bool {
  let stem = file_name.strip_prefix("lib").unwrap_or(file_name);
  for candidate in [file_name, stem] {
    let Some(rest) = candidate.strip_prefix(name) else {
      continue;
    };
    match rest {
      ".a" | ".lib" | ".so" | ".dylib" | ".dll" => return true,
      _ => {
        if let Some(version) = rest.strip_prefix(".so.")
          && version.split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        {
          return true;
        }
      }
    }
  }
  false
}

/// Build the manifest for a packaged layout.
///
/// Every library named in `info.libs` must be provided by a binary artifact
/// in `layout`.
pub fn export(layout: &PackageLayout, info: &PackageInfo, identity: &PackageIdentity) -> Result<PackageManifest, ExportError> {
  let binary_artifacts: Vec<String> = layout
    .entries()
    .iter()
    .filter(|(_, e)| e.kind.is_binary())
    .map(|(dest, _)| dest.clone())
    .collect();

  for name in &info.libs {
    let found = binary_artifacts.iter().any(|dest| {
      let file_name = dest.rsplit('/').next().unwrap_or(dest);
      provides(file_name, name)
    });
    if !found {
      return Err(ExportError::UnresolvedLibraryName {
        name: name.clone(),
        candidates: library_candidates(name).join(", "),
      });
    }
    debug!(library = %name, "resolved library name");
  }

  Ok(PackageManifest {
    reference: identity.reference.clone(),
    package_id: identity.package_id()?,
    recipe_revision: identity.recipe_revision.clone(),
    library_names: info.libs.clone(),
    include_dirs: info.include_dirs.clone(),
    lib_dirs: info.lib_dirs.clone(),
    bin_dirs: info.bin_dirs.clone(),
    binary_artifacts,
    requires: identity.requires.clone(),
    settings: identity.settings.clone(),
    options: identity.options.clone(),
    linkage: identity.linkage(),
    defines: info.defines.clone(),
    system_libs: info.system_libs.clone(),
    created_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
  })
}
