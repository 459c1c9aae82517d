//! Build option declarations and their effective values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allowed value that admits anything.
pub const ANY: &str = "ANY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionError {
  #[error("invalid value '{value}' for option '{key}' (allowed: {allowed})")]
  InvalidOption { key: String, value: String, allowed: String },

  #[error("option '{key}' declared more than once")]
  DuplicateDeclaration { key: String },

  #[error("unknown option '{key}'")]
  UnknownOption { key: String },
}

/// A boolean or string option value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
  Bool(bool),
  Text(String),
}

impl OptionValue {
  /// Parse a value given on the command line or in a profile.
  ///
  /// `true`/`false` in any case become booleans, anything else is text.
  pub fn parse(input: &str) -> Self {
    match input.to_ascii_lowercase().as_str() {
      "true" => Self::Bool(true),
      "false" => Self::Bool(false),
      _ => Self::Text(input.to_string()),
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Self::Bool(b) => Some(*b),
      Self::Text(_) => None,
    }
  }

  fn is_any(&self) -> bool {
    matches!(self, Self::Text(t) if t == ANY)
  }
}

impl fmt::Display for OptionValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Bool(b) => write!(f, "{}", b),
      Self::Text(t) => write!(f, "{}", t),
    }
  }
}

impl From<bool> for OptionValue {
  fn from(value: bool) -> Self {
    Self::Bool(value)
  }
}

impl From<&str> for OptionValue {
  fn from(value: &str) -> Self {
    Self::Text(value.to_string())
  }
}

/// Declaration of one option as written in a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDecl {
  pub key: String,
  pub allowed: Vec<OptionValue>,
  pub default: OptionValue,
}

impl OptionDecl {
  pub fn new(key: impl Into<String>, allowed: Vec<OptionValue>, default: impl Into<OptionValue>) -> Self {
    Self {
      key: key.into(),
      allowed,
      default: default.into(),
    }
  }

  /// A `{true, false}` option.
  pub fn boolean(key: impl Into<String>, default: bool) -> Self {
    Self::new(key, vec![OptionValue::Bool(true), OptionValue::Bool(false)], default)
  }

  fn admits(&self, value: &OptionValue) -> bool {
    self.allowed.iter().any(|a| a.is_any() || a == value)
  }

  fn allowed_display(&self) -> String {
    self
      .allowed
      .iter()
      .map(|v| v.to_string())
      .collect::<Vec<_>>()
      .join(", ")
  }
}

/// A declared option together with its current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeOption {
  pub decl: OptionDecl,
  pub current: OptionValue,
}

/// The set of options a recipe exposes.
///
/// Every current value is either admitted by the declaration or equal to the
/// declared default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionMatrix {
  options: BTreeMap<String, RecipeOption>,
}

impl OptionMatrix {
  pub fn new(decls: Vec<OptionDecl>, overrides: BTreeMap<String, OptionValue>) -> Result<Self, OptionError> {
    let mut options = BTreeMap::new();
    for decl in decls {
      if !decl.admits(&decl.default) {
        return Err(OptionError::InvalidOption {
          key: decl.key.clone(),
          value: decl.default.to_string(),
          allowed: decl.allowed_display(),
        });
      }
      if options.contains_key(&decl.key) {
        return Err(OptionError::DuplicateDeclaration { key: decl.key });
      }
      let current = decl.default.clone();
      options.insert(decl.key.clone(), RecipeOption { decl, current });
    }

    let mut matrix = Self { options };
    for (key, value) in overrides {
      matrix.set(&key, value)?;
    }
    Ok(matrix)
  }

  /// Set the current value of a declared option.
  pub fn set(&mut self, key: &str, value: OptionValue) -> Result<(), OptionError> {
    let option = self
      .options
      .get_mut(key)
      .ok_or_else(|| OptionError::UnknownOption { key: key.to_string() })?;

    if value != option.decl.default && !option.decl.admits(&value) {
      return Err(OptionError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
        allowed: option.decl.allowed_display(),
      });
    }
    option.current = value;
    Ok(())
  }

  /// A copy of this matrix with `overrides` applied on top.
  pub fn with_overrides(&self, overrides: &BTreeMap<String, OptionValue>) -> Result<Self, OptionError> {
    let mut matrix = self.clone();
    for (key, value) in overrides {
      matrix.set(key, value.clone())?;
    }
    Ok(matrix)
  }

  pub fn get(&self, key: &str) -> Option<&OptionValue> {
    self.options.get(key).map(|o| &o.current)
  }

  /// Whether the option exists and is boolean `true`.
  pub fn is_true(&self, key: &str) -> bool {
    self.get(key).and_then(OptionValue::as_bool).unwrap_or(false)
  }

  pub fn declarations(&self) -> impl Iterator<Item = &OptionDecl> {
    self.options.values().map(|o| &o.decl)
  }

  /// Current values keyed by option name.
  pub fn values(&self) -> BTreeMap<String, OptionValue> {
    self
      .options
      .iter()
      .map(|(k, o)| (k.clone(), o.current.clone()))
      .collect()
  }

  /// Deterministic `key=value` rendering sorted by key.
  pub fn option_signature(&self) -> String {
    signature_of(&self.values())
  }

  pub fn is_empty(&self) -> bool {
    self.options.is_empty()
  }
}

/// Render option values as `k1=v1,k2=v2`, sorted by key.
pub fn signature_of(values: &BTreeMap<String, OptionValue>) -> String {
  values
    .iter()
    .map(|(k, v)| format!("{}={}", k, v))
    .collect::<Vec<_>>()
    .join(",")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ff_options() -> Vec<OptionDecl> {
    vec![
      OptionDecl::boolean("shared", false),
      OptionDecl::boolean("debug_info", false),
      OptionDecl::new("backend", vec!["sdl".into(), "null".into()], "sdl"),
    ]
  }

  #[test]
  fn defaults_become_current_values() {
    let matrix = OptionMatrix::new(ff_options(), BTreeMap::new()).unwrap();
    assert_eq!(matrix.get("shared"), Some(&OptionValue::Bool(false)));
    assert_eq!(matrix.get("backend"), Some(&OptionValue::Text("sdl".into())));
    assert!(!matrix.is_true("debug_info"));
  }

  #[test]
  fn override_outside_allowed_set_is_invalid() {
    let overrides = BTreeMap::from([("backend".to_string(), OptionValue::from("vulkan"))]);
    let err = OptionMatrix::new(ff_options(), overrides).unwrap_err();
    assert!(matches!(err, OptionError::InvalidOption { ref key, .. } if key == "backend"));
  }

  #[test]
  fn default_outside_allowed_set_is_invalid() {
    let decls = vec![OptionDecl::new("fpic", vec![true.into()], false)];
    let err = OptionMatrix::new(decls, BTreeMap::new()).unwrap_err();
    assert!(matches!(err, OptionError::InvalidOption { .. }));
  }

  #[test]
  fn unknown_override_is_rejected() {
    let overrides = BTreeMap::from([("static_runtime".to_string(), OptionValue::Bool(true))]);
    let err = OptionMatrix::new(ff_options(), overrides).unwrap_err();
    assert_eq!(
      err,
      OptionError::UnknownOption {
        key: "static_runtime".into()
      }
    );
  }

  #[test]
  fn any_admits_arbitrary_values() {
    let decls = vec![OptionDecl::new("prefix", vec![ANY.into()], "ff")];
    let mut matrix = OptionMatrix::new(decls, BTreeMap::new()).unwrap();
    matrix.set("prefix", "custom".into()).unwrap();
    assert_eq!(matrix.get("prefix"), Some(&OptionValue::Text("custom".into())));
  }

  #[test]
  fn signature_is_sorted_and_stable() {
    let overrides = BTreeMap::from([("shared".to_string(), OptionValue::Bool(true))]);
    let matrix = OptionMatrix::new(ff_options(), overrides).unwrap();
    assert_eq!(matrix.option_signature(), "backend=sdl,debug_info=false,shared=true");
  }

  #[test]
  fn with_overrides_leaves_original_untouched() {
    let matrix = OptionMatrix::new(ff_options(), BTreeMap::new()).unwrap();
    let overrides = BTreeMap::from([("shared".to_string(), OptionValue::parse("True"))]);
    let changed = matrix.with_overrides(&overrides).unwrap();
    assert!(changed.is_true("shared"));
    assert!(!matrix.is_true("shared"));
  }
}
