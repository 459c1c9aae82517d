//! Pinned dependency identifiers.
//!
//! A requirement is written `name/version[@user/channel]`. When the channel
//! part is omitted the requirement lives in the default `_/_` channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CHANNEL_PART: &str = "_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequirementError {
  #[error("invalid requirement '{input}': {reason}")]
  InvalidRequirement { input: String, reason: String },

  #[error("duplicate requirement '{name}': '{first}' and '{second}'")]
  DuplicateRequirement { name: String, first: String, second: String },
}

/// The `user/channel` namespace of a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel {
  pub user: String,
  pub channel: String,
}

impl Channel {
  pub fn new(user: impl Into<String>, channel: impl Into<String>) -> Self {
    Self {
      user: user.into(),
      channel: channel.into(),
    }
  }

  pub fn is_default(&self) -> bool {
    self.user == DEFAULT_CHANNEL_PART && self.channel == DEFAULT_CHANNEL_PART
  }
}

impl Default for Channel {
  fn default() -> Self {
    Self::new(DEFAULT_CHANNEL_PART, DEFAULT_CHANNEL_PART)
  }
}

impl fmt::Display for Channel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.user, self.channel)
  }
}

/// A single pinned dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Requirement {
  pub name: String,
  pub version: String,
  pub channel: Channel,
}

impl Requirement {
  pub fn new(name: impl Into<String>, version: impl Into<String>, channel: Channel) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
      channel,
    }
  }

  pub fn parse(input: &str) -> Result<Self, RequirementError> {
    let invalid = |reason: &str| RequirementError::InvalidRequirement {
      input: input.to_string(),
      reason: reason.to_string(),
    };

    let trimmed = input.trim();
    let (reference, channel) = match trimmed.split_once('@') {
      Some((reference, channel)) => (reference, Some(channel)),
      None => (trimmed, None),
    };

    let (name, version) = reference
      .split_once('/')
      .ok_or_else(|| invalid("expected 'name/version'"))?;
    check_component(name).map_err(|r| invalid(&format!("name {}", r)))?;
    check_component(version).map_err(|r| invalid(&format!("version {}", r)))?;

    let channel = match channel {
      None => Channel::default(),
      Some(channel) => {
        let (user, chan) = channel
          .split_once('/')
          .ok_or_else(|| invalid("expected '@user/channel'"))?;
        check_component(user).map_err(|r| invalid(&format!("user {}", r)))?;
        check_component(chan).map_err(|r| invalid(&format!("channel {}", r)))?;
        Channel::new(user, chan)
      }
    };

    Ok(Self::new(name, version, channel))
  }
}

fn check_component(part: &str) -> Result<(), &'static str> {
  if part.is_empty() {
    return Err("is empty");
  }
  if !part
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'))
  {
    return Err("contains characters outside [A-Za-z0-9_.+-]");
  }
  Ok(())
}

impl fmt::Display for Requirement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}@{}", self.name, self.version, self.channel)
  }
}

impl FromStr for Requirement {
  type Err = RequirementError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<String> for Requirement {
  type Error = RequirementError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<Requirement> for String {
  fn from(value: Requirement) -> Self {
    value.to_string()
  }
}

/// Runtime and build-only requirements of a recipe.
///
/// Names are unique across both lists. Declaration order is kept for
/// diagnostics and resolution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSet {
  requires: Vec<Requirement>,
  build_requires: Vec<Requirement>,
}

impl RequirementSet {
  pub fn new(requires: Vec<Requirement>, build_requires: Vec<Requirement>) -> Result<Self, RequirementError> {
    let mut seen: Vec<&Requirement> = Vec::new();
    for req in requires.iter().chain(build_requires.iter()) {
      if let Some(first) = seen.iter().find(|r| r.name == req.name) {
        return Err(RequirementError::DuplicateRequirement {
          name: req.name.clone(),
          first: first.to_string(),
          second: req.to_string(),
        });
      }
      seen.push(req);
    }

    Ok(Self {
      requires,
      build_requires,
    })
  }

  /// Parse both lists from their string form.
  pub fn parse<S: AsRef<str>>(requires: &[S], build_requires: &[S]) -> Result<Self, RequirementError> {
    let requires = requires
      .iter()
      .map(|s| Requirement::parse(s.as_ref()))
      .collect::<Result<Vec<_>, _>>()?;
    let build_requires = build_requires
      .iter()
      .map(|s| Requirement::parse(s.as_ref()))
      .collect::<Result<Vec<_>, _>>()?;
    Self::new(requires, build_requires)
  }

  pub fn requires(&self) -> &[Requirement] {
    &self.requires
  }

  pub fn build_requires(&self) -> &[Requirement] {
    &self.build_requires
  }

  /// All requirements, runtime first, each tagged with whether it is build-only.
  pub fn iter(&self) -> impl Iterator<Item = (&Requirement, bool)> {
    self
      .requires
      .iter()
      .map(|r| (r, false))
      .chain(self.build_requires.iter().map(|r| (r, true)))
  }

  pub fn len(&self) -> usize {
    self.requires.len() + self.build_requires.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
