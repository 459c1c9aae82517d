//! TOML profiles: named bundles of settings and option overrides.
//!
//! ```toml
//! [settings]
//! os = "Linux"
//! build_type = "Debug"
//!
//! [options]
//! shared = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::options::OptionValue;
use crate::platform::paths::profiles_dir;
use crate::settings::{Settings, SettingsError};

#[derive(Debug, Error)]
pub enum ProfileError {
  #[error("profile '{name}' not found (looked in {path})")]
  NotFound { name: String, path: PathBuf },

  #[error("failed to read profile {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse profile {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("profile {path}: {source}")]
  Setting {
    path: PathBuf,
    #[source]
    source: SettingsError,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
  #[serde(skip)]
  pub path: Option<PathBuf>,
  #[serde(default)]
  pub settings: BTreeMap<String, String>,
  #[serde(default)]
  pub options: BTreeMap<String, OptionValue>,
}

impl Profile {
  /// Load a profile by name from the profiles directory, or by path when
  /// `name_or_path` points at an existing file.
  pub fn load(name_or_path: &str) -> Result<Self, ProfileError> {
    let direct = Path::new(name_or_path);
    if direct.is_file() {
      return Self::from_path(direct);
    }

    let path = profiles_dir().join(format!("{}.toml", name_or_path));
    if !path.is_file() {
      return Err(ProfileError::NotFound {
        name: name_or_path.to_string(),
        path,
      });
    }
    Self::from_path(&path)
  }

  pub fn from_path(path: &Path) -> Result<Self, ProfileError> {
    debug!(path = %path.display(), "loading profile");
    let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut profile: Profile = toml::from_str(&content).map_err(|source| ProfileError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    profile.path = Some(path.to_path_buf());
    Ok(profile)
  }

  /// Apply this profile's settings on top of `settings`.
  pub fn apply_settings(&self, settings: &mut Settings) -> Result<(), ProfileError> {
    for (key, value) in &self.settings {
      settings.set(key, value).map_err(|source| ProfileError::Setting {
        path: self.path.clone().unwrap_or_default(),
        source,
      })?;
    }
    Ok(())
  }
}
