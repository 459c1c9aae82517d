//! Dependency resolution against pre-built packages.
//!
//! A [`PackageSource`] answers "is there a binary of this requirement for these
//! settings?". The [`Resolver`] walks a [`RequirementSet`] in declaration
//! order (runtime requirements first), checks that no two dependencies claim
//! the same library with different linkage, and merges their search paths.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::export::{Linkage, PackageManifest};
use crate::requirement::{Requirement, RequirementSet};
use crate::settings::Settings;
use crate::util::hash::ObjectHash;

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("dependency not found: {requirement} for {os}/{arch}/{build_type}")]
  DependencyNotFound {
    requirement: Requirement,
    os: String,
    arch: String,
    build_type: String,
  },

  #[error("dependency conflict: library '{library}' is {first_linkage} in {first} but {second_linkage} in {second}")]
  DependencyConflict {
    library: String,
    first: Requirement,
    first_linkage: Linkage,
    second: Requirement,
    second_linkage: Linkage,
  },

  #[error("failed to read package {path}: {message}")]
  Read { path: PathBuf, message: String },
}

/// Capability to locate a pre-built package.
pub trait PackageSource: Send + Sync {
  fn resolve(&self, requirement: &Requirement, settings: &Settings) -> Result<Option<ResolvedDependency>, ResolveError>;
}

/// What to do when two dependencies link the same library differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkagePolicy {
  /// Fail with [`ResolveError::DependencyConflict`].
  #[default]
  Uniform,
  /// Log the conflict and keep the first claimant.
  Permissive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
  pub requirement: Requirement,
  pub package_id: ObjectHash,
  pub root: PathBuf,
  pub include_dirs: Vec<PathBuf>,
  pub lib_dirs: Vec<PathBuf>,
  pub bin_dirs: Vec<PathBuf>,
  pub libs: Vec<String>,
  pub binary_files: Vec<PathBuf>,
  pub linkage: Linkage,
  pub defines: Vec<String>,
  pub system_libs: Vec<String>,
  pub build_only: bool,
}

impl ResolvedDependency {
  /// Describe a published package rooted at `root`.
  pub fn from_manifest(requirement: Requirement, root: PathBuf, manifest: &PackageManifest) -> Self {
    let join = |dirs: &[String]| dirs.iter().map(|d| root.join(d)).collect::<Vec<_>>();
    Self {
      requirement,
      package_id: manifest.package_id.clone(),
      include_dirs: join(&manifest.include_dirs),
      lib_dirs: join(&manifest.lib_dirs),
      bin_dirs: join(&manifest.bin_dirs),
      libs: manifest.library_names.clone(),
      binary_files: join(&manifest.binary_artifacts),
      linkage: manifest.linkage,
      defines: manifest.defines.clone(),
      system_libs: manifest.system_libs.clone(),
      build_only: false,
      root,
    }
  }
}

/// The outcome of resolving a whole requirement set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependencies {
  deps: Vec<ResolvedDependency>,
}

impl ResolvedDependencies {
  pub fn all(&self) -> &[ResolvedDependency] {
    &self.deps
  }

  pub fn runtime(&self) -> impl Iterator<Item = &ResolvedDependency> {
    self.deps.iter().filter(|d| !d.build_only)
  }

  pub fn build_only(&self) -> impl Iterator<Item = &ResolvedDependency> {
    self.deps.iter().filter(|d| d.build_only)
  }

  pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
    self.deps.iter().find(|d| d.requirement.name == name)
  }

  pub fn include_paths(&self) -> BTreeSet<PathBuf> {
    self.deps.iter().flat_map(|d| d.include_dirs.iter().cloned()).collect()
  }

  pub fn lib_paths(&self) -> BTreeSet<PathBuf> {
    self.deps.iter().flat_map(|d| d.lib_dirs.iter().cloned()).collect()
  }

  pub fn bin_paths(&self) -> BTreeSet<PathBuf> {
    self.deps.iter().flat_map(|d| d.bin_dirs.iter().cloned()).collect()
  }

  pub fn len(&self) -> usize {
    self.deps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.deps.is_empty()
  }
}

pub struct Resolver<'a> {
  source: &'a dyn PackageSource,
}

impl<'a> Resolver<'a> {
  pub fn new(source: &'a dyn PackageSource) -> Self {
    Self { source }
  }

  pub fn resolve_all(
    &self,
    set: &RequirementSet,
    settings: &Settings,
    policy: LinkagePolicy,
  ) -> Result<ResolvedDependencies, ResolveError> {
    let mut deps = Vec::with_capacity(set.len());
    // library name -> (claimant, linkage)
    let mut claims: BTreeMap<String, (Requirement, Linkage)> = BTreeMap::new();

    for (requirement, build_only) in set.iter() {
      let mut dep = self
        .source
        .resolve(requirement, settings)?
        .ok_or_else(|| ResolveError::DependencyNotFound {
          requirement: requirement.clone(),
          os: settings.os.clone(),
          arch: settings.arch.clone(),
          build_type: settings.build_type.to_string(),
        })?;
      dep.build_only = build_only;

      let mut kept = Vec::with_capacity(dep.libs.len());
      for lib in dep.libs.drain(..) {
        match claims.get(&lib) {
          Some((first, linkage)) if *linkage != dep.linkage => {
            if policy == LinkagePolicy::Uniform {
              return Err(ResolveError::DependencyConflict {
                library: lib,
                first: first.clone(),
                first_linkage: *linkage,
                second: requirement.clone(),
                second_linkage: dep.linkage,
              });
            }
            warn!(
              library = %lib,
              kept = %first,
              dropped = %requirement,
              "conflicting linkage for library, keeping first claimant"
            );
          }
          Some(_) => kept.push(lib),
          None => {
            claims.insert(lib.clone(), (requirement.clone(), dep.linkage));
            kept.push(lib);
          }
        }
      }
      dep.libs = kept;

      debug!(
        requirement = %requirement,
        package_id = %dep.package_id,
        build_only,
        "resolved dependency"
      );
      deps.push(dep);
    }

    info!(count = deps.len(), "resolved dependencies");
    Ok(ResolvedDependencies { deps })
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::collections::HashMap;

  /// In-memory package source keyed by requirement name.
  #[derive(Default)]
  pub struct MemorySource {
    pub packages: HashMap<String, ResolvedDependency>,
  }

  impl MemorySource {
    pub fn with(mut self, reference: &str, libs: &[&str], linkage: Linkage) -> Self {
      let requirement = Requirement::parse(reference).unwrap();
      let root = PathBuf::from("/packages").join(&requirement.name);
      let dep = ResolvedDependency {
        requirement: requirement.clone(),
        package_id: ObjectHash(format!("{}-id", requirement.name)),
        include_dirs: vec![root.join("include")],
        lib_dirs: vec![root.join("lib")],
        bin_dirs: vec![root.join("bin")],
        libs: libs.iter().map(|s| s.to_string()).collect(),
        binary_files: Vec::new(),
        linkage,
        defines: Vec::new(),
        system_libs: Vec::new(),
        build_only: false,
        root,
      };
      self.packages.insert(requirement.name.clone(), dep);
      self
    }
  }

  impl PackageSource for MemorySource {
    fn resolve(&self, requirement: &Requirement, _settings: &Settings) -> Result<Option<ResolvedDependency>, ResolveError> {
      Ok(
        self
          .packages
          .get(&requirement.name)
          .filter(|d| d.requirement == *requirement)
          .cloned(),
      )
    }
  }
}
