//! The on-disk store of published packages.
//!
//! Layout: `<root>/<name>/<version>/<user>/<channel>/<package_id>/` holding the
//! packaged files and `kiln-manifest.json`. A package directory only appears
//! through an atomic rename of a fully written staging directory, so readers
//! never observe a partial package.

pub mod lock;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::MANIFEST_FILENAME;
use crate::export::PackageManifest;
use crate::platform::paths::package_cache_dir;
use crate::requirement::Requirement;
use crate::resolve::{PackageSource, ResolveError, ResolvedDependency};
use crate::settings::Settings;
use crate::util::hash::{ContentHash, DirHashError, hash_directory};

pub use lock::{LockError, PublishLock};

const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Error)]
pub enum CacheError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("{context} {path}: {source}")]
  Io {
    context: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid manifest {path}: {source}")]
  Manifest {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Digest(#[from] DirHashError),

  #[error("publish of {key} cancelled")]
  Cancelled { key: String },
}

impl CacheError {
  fn io<'a>(context: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
    move |source| Self::Io {
      context,
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Result of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
  Published { dir: PathBuf, digest: ContentHash },
  /// An identical identity was already present and was left untouched.
  AlreadyPresent { dir: PathBuf },
}

impl PublishOutcome {
  pub fn dir(&self) -> &Path {
    match self {
      Self::Published { dir, .. } | Self::AlreadyPresent { dir } => dir,
    }
  }
}

/// A published package found in the cache.
#[derive(Debug, Clone)]
pub struct CachedPackage {
  pub dir: PathBuf,
  pub manifest: PackageManifest,
}

#[derive(Debug, Clone)]
pub struct PackageCache {
  root: PathBuf,
}

impl PackageCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// The cache at `KILN_CACHE` or the platform default.
  pub fn open_default() -> Self {
    Self::new(package_cache_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn reference_dir(&self, reference: &Requirement) -> PathBuf {
    self
      .root
      .join(&reference.name)
      .join(&reference.version)
      .join(&reference.channel.user)
      .join(&reference.channel.channel)
  }

  pub fn package_dir(&self, manifest: &PackageManifest) -> PathBuf {
    self.reference_dir(&manifest.reference).join(&manifest.package_id.0)
  }

  /// Publish the files under `layout_dir` with `manifest`.
  ///
  /// Blocks while another publisher holds the lock for `lock_key`. If the
  /// package is already present it is left as is. `cancel` is checked once the
  /// lock is held and again right before the package directory appears.
  pub fn publish(
    &self,
    lock_key: &str,
    manifest: &PackageManifest,
    layout_dir: &Path,
    cancel: &CancellationToken,
  ) -> Result<PublishOutcome, CacheError> {
    let _lock = self.lock_for_publish(lock_key)?;
    let cancelled = || CacheError::Cancelled {
      key: lock_key.to_string(),
    };
    if cancel.is_cancelled() {
      return Err(cancelled());
    }

    let final_dir = self.package_dir(manifest);
    if final_dir.join(MANIFEST_FILENAME).is_file() {
      info!(reference = %manifest.reference, package_id = %manifest.package_id, "package already published");
      return Ok(PublishOutcome::AlreadyPresent { dir: final_dir });
    }

    let reference_dir = self.reference_dir(&manifest.reference);
    let staging = reference_dir.join(format!("{}{}", STAGING_PREFIX, manifest.package_id));
    if staging.exists() {
      debug!(path = %staging.display(), "removing stale staging directory");
      std::fs::remove_dir_all(&staging).map_err(CacheError::io("failed to remove", &staging))?;
    }
    std::fs::create_dir_all(&staging).map_err(CacheError::io("failed to create", &staging))?;

    copy_tree(layout_dir, &staging)?;
    let digest = hash_directory(&staging, &[MANIFEST_FILENAME])?;

    let manifest_path = staging.join(MANIFEST_FILENAME);
    let json = serde_json::to_vec_pretty(manifest).map_err(|source| CacheError::Manifest {
      path: manifest_path.clone(),
      source,
    })?;
    std::fs::write(&manifest_path, json).map_err(CacheError::io("failed to write", &manifest_path))?;

    if cancel.is_cancelled() {
      debug!(path = %staging.display(), "publish cancelled, discarding staging directory");
      std::fs::remove_dir_all(&staging).map_err(CacheError::io("failed to remove", &staging))?;
      return Err(cancelled());
    }
    std::fs::rename(&staging, &final_dir).map_err(CacheError::io("failed to publish", &final_dir))?;
    info!(
      reference = %manifest.reference,
      package_id = %manifest.package_id,
      digest = %digest,
      "published package"
    );
    Ok(PublishOutcome::Published { dir: final_dir, digest })
  }

  /// Takes the lock without waiting when it is free, otherwise reports the
  /// current holder and waits for it.
  fn lock_for_publish(&self, lock_key: &str) -> Result<PublishLock, CacheError> {
    match PublishLock::try_acquire(&self.root, lock_key) {
      Ok(lock) => return Ok(lock),
      Err(LockError::Contention { pid, started_at, .. }) => {
        info!(key = %lock_key, holder_pid = pid, started_at, "waiting for another publisher");
      }
      Err(LockError::ContentionUnknown { lock_path }) => {
        info!(key = %lock_key, lock = %lock_path.display(), "waiting for another publisher");
      }
      Err(err) => return Err(err.into()),
    }
    Ok(PublishLock::acquire(&self.root, lock_key)?)
  }

  /// Every published package of `reference`.
  pub fn packages_of(&self, reference: &Requirement) -> Result<Vec<CachedPackage>, CacheError> {
    let dir = self.reference_dir(reference);
    if !dir.is_dir() {
      return Ok(Vec::new());
    }

    let mut packages = Vec::new();
    let entries = std::fs::read_dir(&dir).map_err(CacheError::io("failed to read", &dir))?;
    for entry in entries {
      let entry = entry.map_err(CacheError::io("failed to read", &dir))?;
      let path = entry.path();
      if entry.file_name().to_string_lossy().starts_with('.') || !path.is_dir() {
        continue;
      }
      if let Some(manifest) = read_manifest(&path)? {
        packages.push(CachedPackage { dir: path, manifest });
      }
    }
    packages.sort_by(|a, b| a.manifest.package_id.cmp(&b.manifest.package_id));
    Ok(packages)
  }

  /// Every published package in the cache, sorted by reference.
  pub fn list(&self) -> Result<Vec<CachedPackage>, CacheError> {
    if !self.root.is_dir() {
      return Ok(Vec::new());
    }

    let mut packages = Vec::new();
    let walker = WalkDir::new(&self.root)
      .min_depth(5)
      .max_depth(5)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
      let entry = entry.map_err(|e| CacheError::Io {
        context: "failed to walk",
        path: self.root.clone(),
        source: e.into(),
      })?;
      if !entry.file_type().is_dir() {
        continue;
      }
      if let Some(manifest) = read_manifest(entry.path())? {
        packages.push(CachedPackage {
          dir: entry.path().to_path_buf(),
          manifest,
        });
      }
    }
    packages.sort_by(|a, b| {
      (a.manifest.reference.to_string(), &a.manifest.package_id)
        .cmp(&(b.manifest.reference.to_string(), &b.manifest.package_id))
    });
    Ok(packages)
  }
}

fn read_manifest(dir: &Path) -> Result<Option<PackageManifest>, CacheError> {
  let path = dir.join(MANIFEST_FILENAME);
  if !path.is_file() {
    return Ok(None);
  }
  let content = std::fs::read(&path).map_err(CacheError::io("failed to read", &path))?;
  let manifest = serde_json::from_slice(&content).map_err(|source| CacheError::Manifest { path, source })?;
  Ok(Some(manifest))
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), CacheError> {
  for entry in WalkDir::new(from).min_depth(1) {
    let entry = entry.map_err(|e| CacheError::Io {
      context: "failed to walk",
      path: from.to_path_buf(),
      source: e.into(),
    })?;
    let Ok(rel) = entry.path().strip_prefix(from) else {
      continue;
    };
    let target = to.join(rel);
    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target).map_err(CacheError::io("failed to create", &target))?;
    } else {
      std::fs::copy(entry.path(), &target).map_err(CacheError::io("failed to copy", &target))?;
    }
  }
  Ok(())
}

/// `key` in `settings` is absent or equal to `value`.
fn setting_matches(manifest: &PackageManifest, key: &str, value: &str) -> bool {
  manifest.settings.get(key).is_none_or(|v| v == value)
}

impl PackageSource for PackageCache {
  /// Prefer a binary with the same os, arch and build type; fall back to any
  /// build type for the same os and arch. Ties go to the newest package.
  fn resolve(&self, requirement: &Requirement, settings: &Settings) -> Result<Option<ResolvedDependency>, ResolveError> {
    let packages = self.packages_of(requirement).map_err(|e| ResolveError::Read {
      path: self.reference_dir(requirement),
      message: e.to_string(),
    })?;

    let build_type = settings.build_type.to_string();
    let mut candidates: Vec<_> = packages
      .into_iter()
      .filter(|p| setting_matches(&p.manifest, "os", &settings.os) && setting_matches(&p.manifest, "arch", &settings.arch))
      .collect();
    candidates.sort_by_key(|p| {
      (
        setting_matches(&p.manifest, "build_type", &build_type),
        p.manifest.created_at_unix,
      )
    });

    Ok(candidates.pop().map(|p| {
      debug!(requirement = %requirement, dir = %p.dir.display(), "found cached package");
      ResolvedDependency::from_manifest(requirement.clone(), p.dir, &p.manifest)
    }))
  }
}
