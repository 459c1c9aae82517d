use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Overrides the root for all kiln configuration and data.
pub const HOME_ENV: &str = "KILN_HOME";

/// Overrides the package cache location.
pub const CACHE_ENV: &str = "KILN_CACHE";

fn env_path(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  env_path("USERPROFILE").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  env_path("HOME").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for configuration files (profiles)
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  if let Some(home) = env_path(HOME_ENV) {
    return home;
  }
  env_path("APPDATA").unwrap_or_else(home_dir).join(APP_NAME)
}

/// Returns the directory for configuration files (profiles)
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  if let Some(home) = env_path(HOME_ENV) {
    return home;
  }
  let config_home = env_path("XDG_CONFIG_HOME").unwrap_or_else(|| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for persistent data files
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Some(home) = env_path(HOME_ENV) {
    return home;
  }
  env_path("LOCALAPPDATA").unwrap_or_else(home_dir).join(APP_NAME)
}

/// Returns the directory for persistent data files
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Some(home) = env_path(HOME_ENV) {
    return home;
  }
  let data_home = env_path("XDG_DATA_HOME").unwrap_or_else(|| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for disposable files such as build work trees
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  if let Some(home) = env_path(HOME_ENV) {
    return home.join("tmp");
  }
  env_path("LOCALAPPDATA")
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for disposable files such as build work trees
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  if let Some(home) = env_path(HOME_ENV) {
    return home.join("tmp");
  }
  let cache_home = env_path("XDG_CACHE_HOME").unwrap_or_else(|| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Root of the published package cache.
///
/// `KILN_CACHE` wins over everything, then `<data_dir>/packages`.
pub fn package_cache_dir() -> PathBuf {
  env_path(CACHE_ENV).unwrap_or_else(|| data_dir().join("packages"))
}

/// Directory holding named TOML profiles.
pub fn profiles_dir() -> PathBuf {
  config_dir().join("profiles")
}

/// Parent directory for per-run build work trees.
pub fn work_root() -> PathBuf {
  cache_dir().join("work")
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn xdg_config_home_takes_precedence() {
    temp_env::with_vars(
      [
        (HOME_ENV, None),
        ("XDG_CONFIG_HOME", Some("/custom/config")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/custom/config").join(APP_NAME));
        assert_eq!(profiles_dir(), PathBuf::from("/custom/config/kiln/profiles"));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        (HOME_ENV, None::<&str>),
        (CACHE_ENV, None::<&str>),
        ("XDG_CONFIG_HOME", None::<&str>),
        ("XDG_DATA_HOME", None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/home/user/.config").join(APP_NAME));
        assert_eq!(data_dir(), PathBuf::from("/home/user/.local/share").join(APP_NAME));
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
        assert_eq!(package_cache_dir(), PathBuf::from("/home/user/.local/share/kiln/packages"));
      },
    );
  }

  #[test]
  #[serial]
  fn kiln_home_overrides_xdg() {
    temp_env::with_vars(
      [
        (HOME_ENV, Some("/opt/kiln")),
        (CACHE_ENV, None),
        ("XDG_CONFIG_HOME", Some("/custom/config")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/opt/kiln"));
        assert_eq!(package_cache_dir(), PathBuf::from("/opt/kiln/packages"));
        assert_eq!(work_root(), PathBuf::from("/opt/kiln/tmp/work"));
      },
    );
  }

  #[test]
  #[serial]
  fn kiln_cache_overrides_package_dir() {
    temp_env::with_vars([(HOME_ENV, Some("/opt/kiln")), (CACHE_ENV, Some("/srv/packages"))], || {
      assert_eq!(package_cache_dir(), PathBuf::from("/srv/packages"));
    });
  }
}
