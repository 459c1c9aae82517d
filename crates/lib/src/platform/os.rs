use std::fmt;

/// Operating systems kiln can detect as a host setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the value used for the `os` setting
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "Linux",
      Self::MacOs => "Macos",
      Self::Windows => "Windows",
    }
  }

  /// The compiler a recipe is assumed to be built with when none is configured
  pub fn default_compiler(&self) -> &'static str {
    match self {
      Self::Linux => "gcc",
      Self::MacOs => "apple-clang",
      Self::Windows => "msvc",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
