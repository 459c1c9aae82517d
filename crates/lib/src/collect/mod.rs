//! Artifact collection: turning a build tree into a package layout.
//!
//! Rules are applied in declaration order. Each rule matches paths relative to
//! its source root with a glob pattern in which `*` also crosses directory
//! separators, so `*.h` finds headers at any depth. When two rules produce the
//! same destination the later rule wins, and a file matched by several rules
//! only lands at the destination of the last of them.
//!
//! [`collect`] only reads the tree; [`PackageLayout::materialize`] performs the
//! copy.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::util::hash::{ContentHash, DirHashError, hash_file};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: false,
  require_literal_leading_dot: false,
};

#[derive(Debug, Error)]
pub enum CollectError {
  #[error("no {category} found under {root} (rules: {patterns})")]
  MissingArtifact {
    category: ArtifactCategory,
    root: PathBuf,
    patterns: String,
  },

  #[error("invalid pattern '{pattern}': {source}")]
  InvalidPattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  #[error("failed to walk {root}: {message}")]
  Walk { root: PathBuf, message: String },

  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("failed to copy {from} to {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// One copy rule: `copy(pattern, dst, src, keep_path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRule {
  pub pattern: String,
  pub dst: String,
  pub keep_path: bool,
  pub src: Option<String>,
}

impl ArtifactRule {
  /// A rule that keeps relative paths, matching the usual header layout.
  pub fn new(pattern: impl Into<String>, dst: impl Into<String>) -> Self {
    Self {
      pattern: pattern.into(),
      dst: dst.into(),
      keep_path: true,
      src: None,
    }
  }

  pub fn flatten(mut self) -> Self {
    self.keep_path = false;
    self
  }

  pub fn with_src(mut self, src: impl Into<String>) -> Self {
    self.src = Some(src.into());
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
  Header,
  StaticLibrary,
  SharedLibrary,
  Other,
}

impl ArtifactKind {
  /// Classify a file by its extension.
  pub fn classify(path: &Path) -> Self {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
      return Self::Other;
    };
    let lower = name.to_ascii_lowercase();

    if is_versioned_so(&lower) {
      return Self::SharedLibrary;
    }
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
      Some("h" | "hh" | "hpp" | "hxx" | "inl") => Self::Header,
      Some("a" | "lib") => Self::StaticLibrary,
      Some("so" | "dylib" | "dll") => Self::SharedLibrary,
      _ => Self::Other,
    }
  }

  pub fn is_binary(&self) -> bool {
    matches!(self, Self::StaticLibrary | Self::SharedLibrary)
  }
}

/// `libfoo.so.1` or `libfoo.so.1.2.3`.
fn is_versioned_so(name: &str) -> bool {
  match name.find(".so.") {
    Some(idx) => name[idx + 4..].split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())),
    None => false,
  }
}

/// A group of artifact kinds a package can be required to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactCategory {
  Headers,
  Libraries,
}

impl ArtifactCategory {
  pub fn includes(&self, kind: ArtifactKind) -> bool {
    match self {
      Self::Headers => kind == ArtifactKind::Header,
      Self::Libraries => kind.is_binary(),
    }
  }
}

impl fmt::Display for ArtifactCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Headers => write!(f, "header artifacts"),
      Self::Libraries => write!(f, "library artifacts"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEntry {
  pub source: PathBuf,
  pub rule: usize,
  pub kind: ArtifactKind,
  pub sha256: ContentHash,
}

/// Destination path (relative, `/`-separated) to the file that fills it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLayout {
  entries: BTreeMap<String, LayoutEntry>,
}

impl PackageLayout {
  pub fn entries(&self) -> &BTreeMap<String, LayoutEntry> {
    &self.entries
  }

  pub fn get(&self, dest: &str) -> Option<&LayoutEntry> {
    self.entries.get(dest)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Destination paths of a given kind, in order.
  pub fn paths_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &str> {
    self
      .entries
      .iter()
      .filter(move |(_, e)| e.kind == kind)
      .map(|(dest, _)| dest.as_str())
  }

  pub fn has_category(&self, category: ArtifactCategory) -> bool {
    self.entries.values().any(|e| category.includes(e.kind))
  }

  /// Copy every entry under `dest`, creating directories as needed.
  pub fn materialize(&self, dest: &Path) -> Result<(), CollectError> {
    for (rel, entry) in &self.entries {
      let target = dest.join(rel);
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CollectError::Copy {
          from: entry.source.clone(),
          to: target.clone(),
          source,
        })?;
      }
      std::fs::copy(&entry.source, &target).map_err(|source| CollectError::Copy {
        from: entry.source.clone(),
        to: target.clone(),
        source,
      })?;
      trace!(from = %entry.source.display(), to = %target.display(), "copied artifact");
    }
    Ok(())
  }

  fn merge(&mut self, other: PackageLayout) {
    self.entries.extend(other.entries);
  }
}

/// Apply `rules` to the tree under `root` and compute the resulting layout.
///
/// Fails with [`CollectError::MissingArtifact`] when a category in `required`
/// has no match across all rules.
pub fn collect(root: &Path, rules: &[ArtifactRule], required: &[ArtifactCategory]) -> Result<PackageLayout, CollectError> {
  let mut layout = PackageLayout::default();
  let mut placed: HashMap<PathBuf, String> = HashMap::new();

  for (index, rule) in rules.iter().enumerate() {
    let pattern = Pattern::new(&rule.pattern).map_err(|source| CollectError::InvalidPattern {
      pattern: rule.pattern.clone(),
      source,
    })?;
    let scan_root = match &rule.src {
      Some(src) => root.join(src),
      None => root.to_path_buf(),
    };

    let mut matched = 0usize;
    for (rel, path) in scan_files(&scan_root)? {
      if !pattern.matches_with(&rel, MATCH_OPTIONS) {
        continue;
      }
      let dest = destination(rule, &rel, &path);
      if let Some(previous) = placed.insert(path.clone(), dest.clone())
        && previous != dest
        && layout.entries.get(&previous).is_some_and(|e| e.source == path)
      {
        layout.entries.remove(&previous);
        debug!(from = %previous, to = %dest, rule = index, "later rule moves file");
      }
      let entry = LayoutEntry {
        kind: ArtifactKind::classify(&path),
        sha256: hash_file(&path)?,
        source: path,
        rule: index,
      };
      if let Some(previous) = layout.entries.insert(dest.clone(), entry) {
        debug!(dest = %dest, previous_rule = previous.rule, rule = index, "later rule overrides destination");
      }
      matched += 1;
    }

    if matched == 0 {
      debug!(pattern = %rule.pattern, root = %scan_root.display(), "rule matched no files");
    } else {
      debug!(pattern = %rule.pattern, matched, "rule matched files");
    }
  }

  check_required(&layout, root, rules, required)?;
  Ok(layout)
}

/// [`collect`] over several roots in order, e.g. the source and build trees.
/// Later roots win on identical destinations and `required` is checked
/// against the merged layout.
pub fn collect_all(roots: &[&Path], rules: &[ArtifactRule], required: &[ArtifactCategory]) -> Result<PackageLayout, CollectError> {
  let mut layout = PackageLayout::default();
  for root in roots {
    layout.merge(collect(root, rules, &[])?);
  }
  let reported = roots.last().copied().unwrap_or(Path::new("."));
  check_required(&layout, reported, rules, required)?;
  Ok(layout)
}

fn check_required(
  layout: &PackageLayout,
  root: &Path,
  rules: &[ArtifactRule],
  required: &[ArtifactCategory],
) -> Result<(), CollectError> {
  for category in required {
    if !layout.has_category(*category) {
      return Err(CollectError::MissingArtifact {
        category: *category,
        root: root.to_path_buf(),
        patterns: rules.iter().map(|r| r.pattern.as_str()).collect::<Vec<_>>().join(", "),
      });
    }
  }
  Ok(())
}

/// Apply import rules over each dependency root and copy the matches into
/// `dest`. Later roots win on identical destinations.
pub fn import_artifacts<'a>(
  roots: impl IntoIterator<Item = &'a Path>,
  rules: &[ArtifactRule],
  dest: &Path,
) -> Result<PackageLayout, CollectError> {
  let mut layout = PackageLayout::default();
  for root in roots {
    layout.merge(collect(root, rules, &[])?);
  }
  layout.materialize(dest)?;
  debug!(count = layout.len(), dest = %dest.display(), "imported artifacts");
  Ok(layout)
}

fn destination(rule: &ArtifactRule, rel: &str, path: &Path) -> String {
  let tail = if rule.keep_path {
    rel.to_string()
  } else {
    path
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| rel.to_string())
  };
  let dst = rule.dst.trim_matches('/');
  if dst.is_empty() || dst == "." {
    tail
  } else {
    format!("{}/{}", dst, tail)
  }
}

/// Every regular file under `root` as `(relative path with '/', absolute path)`,
/// sorted by relative path. Symlinks to regular files count, under the link's
/// own name. A missing root yields no files.
fn scan_files(root: &Path) -> Result<Vec<(String, PathBuf)>, CollectError> {
  if !root.is_dir() {
    return Ok(Vec::new());
  }

  let mut files = Vec::new();
  for entry in WalkDir::new(root).sort_by_file_name() {
    let entry = entry.map_err(|e| CollectError::Walk {
      root: root.to_path_buf(),
      message: e.to_string(),
    })?;
    if !entry.path().is_file() {
      continue;
    }
    let Ok(rel) = entry.path().strip_prefix(root) else {
      continue;
    };
    let rel = rel
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");
    files.push((rel, entry.path().to_path_buf()));
  }
  Ok(files)
}
