//! Target settings: the `os`, `arch`, `compiler` and `build_type` axes.

pub mod profile;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
  #[error("unknown setting '{0}' (expected os, arch, compiler, compiler.version or build_type)")]
  UnknownSetting(String),

  #[error("invalid build_type '{0}' (expected Debug, Release, RelWithDebInfo or MinSizeRel)")]
  InvalidBuildType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum BuildType {
  Debug,
  #[default]
  Release,
  RelWithDebInfo,
  MinSizeRel,
}

impl BuildType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Debug => "Debug",
      Self::Release => "Release",
      Self::RelWithDebInfo => "RelWithDebInfo",
      Self::MinSizeRel => "MinSizeRel",
    }
  }

  /// Optimized builds that do not already carry debug info.
  pub fn is_release_like(&self) -> bool {
    matches!(self, Self::Release | Self::MinSizeRel)
  }
}

impl fmt::Display for BuildType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for BuildType {
  type Err = SettingsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Debug" => Ok(Self::Debug),
      "Release" => Ok(Self::Release),
      "RelWithDebInfo" => Ok(Self::RelWithDebInfo),
      "MinSizeRel" => Ok(Self::MinSizeRel),
      other => Err(SettingsError::InvalidBuildType(other.to_string())),
    }
  }
}

/// The build type a run actually uses.
///
/// A release-like build with `debug_info` enabled is promoted to
/// `RelWithDebInfo`; every other combination keeps the configured type.
pub fn effective_build_type(configured: BuildType, debug_info: bool) -> BuildType {
  if configured.is_release_like() && debug_info {
    BuildType::RelWithDebInfo
  } else {
    configured
  }
}

/// A settings axis a recipe can declare itself sensitive to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingAxis {
  Os,
  Compiler,
  BuildType,
  Arch,
}

impl SettingAxis {
  pub const ALL: [SettingAxis; 4] = [Self::Os, Self::Compiler, Self::BuildType, Self::Arch];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Os => "os",
      Self::Compiler => "compiler",
      Self::BuildType => "build_type",
      Self::Arch => "arch",
    }
  }
}

impl FromStr for SettingAxis {
  type Err = SettingsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|a| a.as_str() == s)
      .ok_or_else(|| SettingsError::UnknownSetting(s.to_string()))
  }
}

/// Target settings for one build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings {
  pub os: String,
  pub arch: String,
  pub compiler: String,
  pub compiler_version: String,
  pub build_type: BuildType,
}

impl Settings {
  /// Settings describing the host, with a `Release` build type.
  pub fn detect() -> Self {
    match Platform::current() {
      Some(platform) => Self {
        os: platform.os.as_str().to_string(),
        arch: platform.arch.as_str().to_string(),
        compiler: platform.os.default_compiler().to_string(),
        compiler_version: String::new(),
        build_type: BuildType::default(),
      },
      None => Self {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        compiler: String::new(),
        compiler_version: String::new(),
        build_type: BuildType::default(),
      },
    }
  }

  /// Apply a single `key=value` override (`-s build_type=Debug`).
  pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
    match key {
      "os" => self.os = value.to_string(),
      "arch" => self.arch = value.to_string(),
      "compiler" => self.compiler = value.to_string(),
      "compiler.version" | "compiler_version" => self.compiler_version = value.to_string(),
      "build_type" => self.build_type = value.parse()?,
      other => return Err(SettingsError::UnknownSetting(other.to_string())),
    }
    Ok(())
  }

  /// Look up a setting by its user-facing key.
  pub fn get(&self, key: &str) -> Option<String> {
    match key {
      "os" => Some(self.os.clone()),
      "arch" => Some(self.arch.clone()),
      "compiler" => Some(self.compiler.clone()),
      "compiler.version" | "compiler_version" => Some(self.compiler_version.clone()),
      "build_type" => Some(self.build_type.to_string()),
      _ => None,
    }
  }

  /// The settings restricted to the axes a recipe declares, as used in its
  /// package identity.
  pub fn restricted(&self, axes: &[SettingAxis]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for axis in axes {
      match axis {
        SettingAxis::Os => {
          map.insert("os".to_string(), self.os.clone());
        }
        SettingAxis::Arch => {
          map.insert("arch".to_string(), self.arch.clone());
        }
        SettingAxis::BuildType => {
          map.insert("build_type".to_string(), self.build_type.to_string());
        }
        SettingAxis::Compiler => {
          map.insert("compiler".to_string(), self.compiler.clone());
          if !self.compiler_version.is_empty() {
            map.insert("compiler.version".to_string(), self.compiler_version.clone());
          }
        }
      }
    }
    map
  }
}
