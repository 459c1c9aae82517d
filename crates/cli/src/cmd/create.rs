//! Implementation of the `kiln create` command.
//!
//! Runs a recipe through its whole lifecycle and publishes the result into
//! the local package cache.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kiln_lib::cache::{PackageCache, PublishOutcome};
use kiln_lib::execute::{ExecuteConfig, Lifecycle, ProcessRunner};
use kiln_lib::export::PackageManifest;
use kiln_lib::requirement::Channel;

use super::ConfigArgs;
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success, truncate_hash};

#[derive(Debug, Args)]
pub struct CreateArgs {
  #[command(flatten)]
  pub config: ConfigArgs,

  /// User part of the channel to publish under
  #[arg(long, requires = "channel")]
  pub user: Option<String>,

  /// Channel part of the channel to publish under
  #[arg(long, requires = "user")]
  pub channel: Option<String>,

  /// Keep the working directory after the run
  #[arg(long)]
  pub keep_workdir: bool,

  /// Shell used for run() commands
  #[arg(long)]
  pub shell: Option<String>,

  #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
  pub format: OutputFormat,
}

#[derive(Serialize)]
struct CreateReport<'a> {
  reference: String,
  package_id: &'a str,
  path: String,
  already_present: bool,
  duration_ms: u64,
  manifest: &'a PackageManifest,
}

/// Execute the create command.
///
/// Ctrl-C cancels the running stage; the working directory is removed and
/// nothing is published.
pub fn cmd_create(args: CreateArgs) -> Result<()> {
  let (recipe, settings) = args.config.load()?;

  let channel = match (args.user, args.channel) {
    (Some(user), Some(channel)) => Channel::new(user, channel),
    _ => Channel::default(),
  };
  let config = ExecuteConfig {
    keep_workdir: args.keep_workdir,
    shell: args.shell,
    channel,
    ..Default::default()
  };
  let cache = PackageCache::open_default();
  debug!(cache = %cache.root().display(), "using package cache");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let cancel = CancellationToken::new();
  rt.spawn(super::cancel_on_ctrl_c(cancel.clone()));

  let started = Instant::now();
  let runner = ProcessRunner;
  let mut lifecycle = Lifecycle::new(recipe, settings, config, &cache, &runner, cancel)?;
  let manifest = rt.block_on(lifecycle.run())?;
  let elapsed = started.elapsed();

  let (dir, already_present) = match lifecycle.published() {
    Some(PublishOutcome::AlreadyPresent { dir }) => (dir.display().to_string(), true),
    Some(outcome) => (outcome.dir().display().to_string(), false),
    None => (String::new(), false),
  };

  if args.format.is_json() {
    return print_json(&CreateReport {
      reference: manifest.reference.to_string(),
      package_id: &manifest.package_id.0,
      path: dir,
      already_present,
      duration_ms: elapsed.as_millis() as u64,
      manifest: &manifest,
    });
  }

  if already_present {
    print_success(&format!("{} already in cache", manifest.reference));
  } else {
    print_success(&format!("Created {}", manifest.reference));
  }
  print_stat("Package ID", truncate_hash(&manifest.package_id.0));
  print_stat("Options", &manifest.option_signature());
  print_stat("Linkage", &manifest.linkage.to_string());
  if !manifest.library_names.is_empty() {
    print_stat("Libraries", &manifest.library_names.join(", "));
  }
  print_stat("Path", &dir);
  print_stat("Duration", &format_duration(elapsed));

  Ok(())
}
