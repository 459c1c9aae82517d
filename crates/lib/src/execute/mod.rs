//! The lifecycle executor.
//!
//! A [`Lifecycle`] drives one recipe through
//! `Created → SourceAcquired → Configured → Built → Packaged → Published`.
//! Each transition records the matching stage callback, carries out what it
//! recorded and moves to the next state. The first failure parks the machine in
//! `Failed { at }`; nothing is retried and a failed machine accepts no further
//! transitions.

pub mod actions;
pub mod batch;
pub mod generators;
pub mod install;
pub mod runner;
pub mod types;

use std::path::Path;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::{PackageCache, PublishOutcome};
use crate::collect::{ArtifactCategory, collect_all};
use crate::consts::{DEBUG_INFO_OPTION, SHARED_OPTION};
use crate::export::{PackageIdentity, PackageManifest, export};
use crate::options::OptionValue;
use crate::recipe::{ConfigView, Recipe, StageKind, StageRecord};
use crate::requirement::Requirement;
use crate::resolve::Resolver;
use crate::settings::{Settings, effective_build_type};

use actions::{ActionScope, invocations};
use generators::write_generators;
use runner::CommandRunner;

pub use batch::{CreateJob, create_many};
pub use install::{InstallReport, install};
pub use runner::{CommandOutput, Invocation, ProcessRunner, ToolError};
pub use types::{
  BuildContext, ExecuteConfig, LifecycleError, LifecycleState, StageError, Step, StepFailure, WorkDir,
};

/// One recipe run.
pub struct Lifecycle<'a, R: CommandRunner> {
  recipe: Recipe,
  reference: Requirement,
  settings: Settings,
  config: ExecuteConfig,
  cache: &'a PackageCache,
  runner: &'a R,
  cancel: CancellationToken,
  state: LifecycleState,
  ctx: BuildContext,
  published: Option<PublishOutcome>,
}

impl<'a, R: CommandRunner> Lifecycle<'a, R> {
  /// Set up a run and its working directory. `recipe` should already carry
  /// its option overrides.
  pub fn new(
    recipe: Recipe,
    settings: Settings,
    config: ExecuteConfig,
    cache: &'a PackageCache,
    runner: &'a R,
    cancel: CancellationToken,
  ) -> Result<Self, LifecycleError> {
    let reference = recipe.reference(config.channel.clone());
    let mut work = WorkDir::create(&config, &recipe.metadata.name).map_err(|e| LifecycleError {
      reference: reference.to_string(),
      state: LifecycleState::Created,
      error: StageError::Source(StepFailure::io("failed to create working directory")(e)),
    })?;
    if config.keep_workdir {
      work.keep();
    }
    debug!(path = %work.root().display(), "created working directory");
    let ctx = BuildContext::new(work, settings.clone(), recipe.options.values());

    Ok(Self {
      recipe,
      reference,
      settings,
      config,
      cache,
      runner,
      cancel,
      state: LifecycleState::Created,
      ctx,
      published: None,
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn reference(&self) -> &Requirement {
    &self.reference
  }

  pub fn context(&self) -> &BuildContext {
    &self.ctx
  }

  pub fn published(&self) -> Option<&PublishOutcome> {
    self.published.as_ref()
  }

  /// Drive every transition and return the published manifest.
  pub async fn run(&mut self) -> Result<PackageManifest, LifecycleError> {
    let started = Instant::now();
    self.acquire_source().await?;
    self.configure().await?;
    self.build().await?;
    self.package().await?;
    let manifest = self.publish().await?;
    info!(
      reference = %self.reference,
      package_id = %manifest.package_id,
      elapsed_ms = started.elapsed().as_millis() as u64,
      "package created"
    );
    Ok(manifest)
  }

  /// `Created → SourceAcquired`: run `source()`.
  pub async fn acquire_source(&mut self) -> Result<(), LifecycleError> {
    self.begin(Step::Source)?;
    let result = self.do_acquire_source().await;
    self.finish(Step::Source, result)
  }

  async fn do_acquire_source(&mut self) -> Result<(), StepFailure> {
    let record = self.record(StageKind::Source)?;
    self.run_actions(StageKind::Source, &record).await
  }

  /// `SourceAcquired → Configured`: fix the effective build type, resolve
  /// dependencies, write generator files and run `imports()`.
  pub async fn configure(&mut self) -> Result<(), LifecycleError> {
    self.begin(Step::Configure)?;
    let result = self.do_configure();
    self.finish(Step::Configure, result)
  }

  fn do_configure(&mut self) -> Result<(), StepFailure> {
    let resolved = Resolver::new(self.cache).resolve_all(
      &self.recipe.requirements,
      &self.settings,
      self.config.linkage_policy,
    )?;

    let ctx = &mut self.ctx;
    let debug_info = ctx
      .options
      .get(DEBUG_INFO_OPTION)
      .and_then(OptionValue::as_bool)
      .unwrap_or(false);
    let build_type = effective_build_type(ctx.settings.build_type, debug_info);
    if build_type != ctx.settings.build_type {
      info!(configured = %ctx.settings.build_type, effective = %build_type, "promoted build type for debug info");
    }
    ctx.build_type = Some(build_type);
    ctx.resolved = resolved;

    let build_dir = ctx.work.build_dir();
    write_generators(&self.recipe.generators, &self.ctx.resolved, build_type, &build_dir)
      .map_err(StepFailure::io("failed to write generator files"))?;

    let record = self.record(StageKind::Imports)?;
    if !record.rules.is_empty() {
      let roots: Vec<&Path> = self.ctx.resolved.all().iter().map(|d| d.root.as_path()).collect();
      let imported = crate::collect::import_artifacts(roots, &record.rules, &build_dir)?;
      info!(count = imported.len(), "imported dependency artifacts");
    }
    Ok(())
  }

  /// `Configured → Built`: run `build()`.
  pub async fn build(&mut self) -> Result<(), LifecycleError> {
    self.begin(Step::Build)?;
    let result = self.do_build().await;
    self.finish(Step::Build, result)
  }

  async fn do_build(&mut self) -> Result<(), StepFailure> {
    let record = self.record(StageKind::Build)?;
    self.run_actions(StageKind::Build, &record).await
  }

  /// `Built → Packaged`: collect artifacts into the package directory.
  ///
  /// Records `package_info()` as well, since a declared library makes the
  /// library category required.
  pub async fn package(&mut self) -> Result<(), LifecycleError> {
    self.begin(Step::Package)?;
    let result = self.do_package();
    self.finish(Step::Package, result)
  }

  fn do_package(&mut self) -> Result<(), StepFailure> {
    let rules = self.record(StageKind::Package)?.rules;
    let info = self.record(StageKind::PackageInfo)?.info;

    let required: &[ArtifactCategory] = if info.libs.is_empty() {
      &[]
    } else {
      &[ArtifactCategory::Libraries]
    };

    let ctx = &mut self.ctx;
    let (source_dir, build_dir, package_dir) = (ctx.work.source_dir(), ctx.work.build_dir(), ctx.work.package_dir());
    let layout = collect_all(&[source_dir.as_path(), build_dir.as_path()], &rules, required)?;
    layout.materialize(&package_dir)?;
    info!(artifacts = layout.len(), "packaged artifacts");

    ctx.layout = Some(layout);
    ctx.info = Some(info);
    Ok(())
  }

  /// `Packaged → Published`: export the manifest and publish it to the cache
  /// under the identity lock.
  pub async fn publish(&mut self) -> Result<PackageManifest, LifecycleError> {
    self.begin(Step::Publish)?;
    let result = self.do_publish().await;
    self.finish(Step::Publish, result)
  }

  async fn do_publish(&mut self) -> Result<PackageManifest, StepFailure> {
    let ctx = &self.ctx;
    let identity = PackageIdentity {
      reference: self.reference.clone(),
      recipe_revision: self.recipe.revision().clone(),
      settings: ctx.settings.restricted(&self.recipe.settings),
      options: ctx.options.clone(),
      requires: self.recipe.requirements.requires().to_vec(),
    };
    let (Some(layout), Some(info)) = (&ctx.layout, &ctx.info) else {
      return Err(StepFailure::Io {
        context: "nothing was packaged".into(),
        source: std::io::Error::other("package state missing"),
      });
    };
    let manifest = export(layout, info, &identity)?;

    if self.cancel.is_cancelled() {
      return Err(StepFailure::Tool(ToolError::Cancelled {
        command: "publish".into(),
      }));
    }

    let cache = self.cache.clone();
    let lock_key = identity.lock_key();
    let package_dir = ctx.work.package_dir();
    let to_publish = manifest.clone();
    let cancel = self.cancel.clone();
    debug!(key = %lock_key, "publishing");
    let outcome = tokio::task::spawn_blocking(move || cache.publish(&lock_key, &to_publish, &package_dir, &cancel))
      .await
      .map_err(|e| StepFailure::Io {
        context: "publish task failed".into(),
        source: std::io::Error::other(e),
      })??;

    self.published = Some(outcome);
    Ok(manifest)
  }

  fn begin(&self, step: Step) -> Result<(), LifecycleError> {
    if self.state != step.from_state() {
      return Err(LifecycleError {
        reference: self.reference.to_string(),
        state: self.state,
        error: StageError::InvalidTransition {
          from: self.state,
          attempted: step,
        },
      });
    }
    info!(reference = %self.reference, step = %step, "starting step");
    Ok(())
  }

  fn finish<T>(&mut self, step: Step, result: Result<T, StepFailure>) -> Result<T, LifecycleError> {
    match result {
      Ok(value) => {
        self.state = step.to_state();
        debug!(reference = %self.reference, state = %self.state, "step completed");
        Ok(value)
      }
      Err(failure) => {
        let from = self.state;
        self.state = LifecycleState::Failed { at: step };
        let error = StageError::at(step, failure);
        error!(reference = %self.reference, step = %step, error = %error, "step failed");
        Err(LifecycleError {
          reference: self.reference.to_string(),
          state: from,
          error,
        })
      }
    }
  }

  fn view(&self) -> ConfigView {
    let ctx = &self.ctx;
    ConfigView {
      settings: ctx.settings.clone(),
      options: ctx.options.clone(),
      build_type: ctx.build_type(),
    }
  }

  fn record(&self, stage: StageKind) -> Result<StageRecord, StepFailure> {
    Ok(self.recipe.stages.record(stage, &self.view())?)
  }

  async fn run_actions(&self, stage: StageKind, record: &StageRecord) -> Result<(), StepFailure> {
    let ctx = &self.ctx;
    let (source_dir, build_dir) = (ctx.work.source_dir(), ctx.work.build_dir());
    let scope = ActionScope {
      stage,
      source_dir: &source_dir,
      build_dir: &build_dir,
      build_type: ctx.build_type(),
      shared: ctx.options.get(SHARED_OPTION).and_then(OptionValue::as_bool).unwrap_or(false),
      deps: &ctx.resolved,
      shell: self.config.shell.as_deref(),
    };

    for action in &record.actions {
      for invocation in invocations(action, &scope) {
        if !invocation.cwd.exists() {
          std::fs::create_dir_all(&invocation.cwd).map_err(StepFailure::io("failed to create action directory"))?;
        }
        self.runner.run(&invocation, &self.cancel).await?;
      }
    }
    Ok(())
  }
}
