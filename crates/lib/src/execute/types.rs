//! States, errors and configuration of the lifecycle executor.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::cache::CacheError;
use crate::collect::{CollectError, PackageLayout};
use crate::export::{ExportError, PackageInfo};
use crate::options::OptionValue;
use crate::platform::paths::work_root;
use crate::recipe::RecipeError;
use crate::requirement::Channel;
use crate::resolve::{LinkagePolicy, ResolveError, ResolvedDependencies};
use crate::settings::{BuildType, Settings};

use super::runner::ToolError;

/// A transition of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
  Source,
  Configure,
  Build,
  Package,
  Publish,
}

impl Step {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Source => "source",
      Self::Configure => "configure",
      Self::Build => "build",
      Self::Package => "package",
      Self::Publish => "publish",
    }
  }

  /// The state this step must start from.
  pub fn from_state(&self) -> LifecycleState {
    match self {
      Self::Source => LifecycleState::Created,
      Self::Configure => LifecycleState::SourceAcquired,
      Self::Build => LifecycleState::Configured,
      Self::Package => LifecycleState::Built,
      Self::Publish => LifecycleState::Packaged,
    }
  }

  /// The state a successful step ends in.
  pub fn to_state(&self) -> LifecycleState {
    match self {
      Self::Source => LifecycleState::SourceAcquired,
      Self::Configure => LifecycleState::Configured,
      Self::Build => LifecycleState::Built,
      Self::Package => LifecycleState::Packaged,
      Self::Publish => LifecycleState::Published,
    }
  }
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
  Created,
  SourceAcquired,
  Configured,
  Built,
  Packaged,
  Published,
  /// Terminal. `at` is the step that failed.
  Failed { at: Step },
}

impl LifecycleState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Published | Self::Failed { .. })
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Created => write!(f, "Created"),
      Self::SourceAcquired => write!(f, "SourceAcquired"),
      Self::Configured => write!(f, "Configured"),
      Self::Built => write!(f, "Built"),
      Self::Packaged => write!(f, "Packaged"),
      Self::Published => write!(f, "Published"),
      Self::Failed { at } => write!(f, "Failed(at {})", at),
    }
  }
}

/// The collaborator failure behind a stage error.
#[derive(Debug, Error)]
pub enum StepFailure {
  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error(transparent)]
  Tool(#[from] ToolError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Collect(#[from] CollectError),

  #[error(transparent)]
  Export(#[from] ExportError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },
}

impl StepFailure {
  pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
    let context = context.into();
    move |source| Self::Io { context, source }
  }

  fn is_cancellation(&self) -> bool {
    matches!(
      self,
      Self::Tool(ToolError::Cancelled { .. }) | Self::Cache(CacheError::Cancelled { .. })
    )
  }
}

#[derive(Debug, Error)]
pub enum StageError {
  #[error("source error: {0}")]
  Source(#[source] StepFailure),

  #[error("configuration error: {0}")]
  Configuration(#[source] StepFailure),

  #[error("build error: {0}")]
  Build(#[source] StepFailure),

  #[error("packaging error: {0}")]
  Packaging(#[source] StepFailure),

  #[error("publish error: {0}")]
  Publish(#[source] StepFailure),

  #[error("cancelled during {step}")]
  Cancelled { step: Step },

  #[error("cannot {attempted} from state {from}")]
  InvalidTransition { from: LifecycleState, attempted: Step },
}

impl StageError {
  /// Wrap `failure` in the error kind of `step`.
  pub fn at(step: Step, failure: StepFailure) -> Self {
    if failure.is_cancellation() {
      return Self::Cancelled { step };
    }
    match step {
      Step::Source => Self::Source(failure),
      Step::Configure => Self::Configuration(failure),
      Step::Build => Self::Build(failure),
      Step::Package => Self::Packaging(failure),
      Step::Publish => Self::Publish(failure),
    }
  }

  pub fn failure(&self) -> Option<&StepFailure> {
    match self {
      Self::Source(f) | Self::Configuration(f) | Self::Build(f) | Self::Packaging(f) | Self::Publish(f) => Some(f),
      Self::Cancelled { .. } | Self::InvalidTransition { .. } => None,
    }
  }
}

/// A lifecycle failure together with the state the executor was in.
#[derive(Debug, Error)]
#[error("{reference}: {error} (in state {state})")]
pub struct LifecycleError {
  pub reference: String,
  pub state: LifecycleState,
  #[source]
  pub error: StageError,
}

/// Options for running recipes.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of recipes created concurrently by `create_many`.
  pub parallelism: usize,

  /// Keep the working directory after the run.
  pub keep_workdir: bool,

  /// Shell for `run` actions. Defaults to /bin/sh (Unix) or powershell.exe (Windows).
  pub shell: Option<String>,

  /// Parent of per-run working directories. Defaults to the kiln cache dir.
  pub work_root: Option<PathBuf>,

  /// Channel the package is published under.
  pub channel: Channel,

  pub linkage_policy: LinkagePolicy,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      keep_workdir: false,
      shell: None,
      work_root: None,
      channel: Channel::default(),
      linkage_policy: LinkagePolicy::default(),
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Per-run working tree: `source/`, `build/` and `package/`.
#[derive(Debug)]
pub struct WorkDir {
  temp: Option<tempfile::TempDir>,
  root: PathBuf,
}

impl WorkDir {
  pub fn create(config: &ExecuteConfig, name: &str) -> std::io::Result<Self> {
    let parent = config.work_root.clone().unwrap_or_else(work_root);
    std::fs::create_dir_all(&parent)?;
    let temp = tempfile::Builder::new().prefix(&format!("{}-", name)).tempdir_in(&parent)?;
    let root = temp.path().to_path_buf();
    for dir in ["source", "build", "package"] {
      std::fs::create_dir_all(root.join(dir))?;
    }
    Ok(Self { temp: Some(temp), root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn source_dir(&self) -> PathBuf {
    self.root.join("source")
  }

  pub fn build_dir(&self) -> PathBuf {
    self.root.join("build")
  }

  pub fn package_dir(&self) -> PathBuf {
    self.root.join("package")
  }

  /// Stop the directory from being removed on drop.
  pub fn keep(&mut self) {
    if let Some(temp) = self.temp.take() {
      let root = temp.keep();
      debug!(path = %root.display(), "keeping working directory");
    }
  }
}

/// Everything one run accumulates. Owned by the lifecycle executor.
#[derive(Debug)]
pub struct BuildContext {
  pub work: WorkDir,
  pub settings: Settings,
  pub options: BTreeMap<String, OptionValue>,
  /// Set once during configure.
  pub build_type: Option<BuildType>,
  pub resolved: ResolvedDependencies,
  pub layout: Option<PackageLayout>,
  pub info: Option<PackageInfo>,
}

impl BuildContext {
  pub fn new(work: WorkDir, settings: Settings, options: BTreeMap<String, OptionValue>) -> Self {
    Self {
      work,
      settings,
      options,
      build_type: None,
      resolved: ResolvedDependencies::default(),
      layout: None,
      info: None,
    }
  }

  /// The effective build type, or the configured one before configure ran.
  pub fn build_type(&self) -> BuildType {
    self.build_type.unwrap_or(self.settings.build_type)
  }
}
