//! Creating several independent recipes concurrently.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::PackageCache;
use crate::export::PackageManifest;
use crate::recipe::Recipe;
use crate::settings::Settings;

use super::Lifecycle;
use super::runner::CommandRunner;
use super::types::{ExecuteConfig, LifecycleError};

/// One recipe to create.
#[derive(Debug, Clone)]
pub struct CreateJob {
  pub recipe: Recipe,
  pub settings: Settings,
}

/// Run a full lifecycle for every job, at most `config.parallelism` at once.
///
/// Each job gets its own working directory. Results come back in job order.
pub async fn create_many<R>(
  jobs: Vec<CreateJob>,
  config: &ExecuteConfig,
  cache: &PackageCache,
  runner: Arc<R>,
  cancel: CancellationToken,
) -> Vec<(String, Result<PackageManifest, LifecycleError>)>
where
  R: CommandRunner + 'static,
{
  info!(jobs = jobs.len(), parallelism = config.parallelism, "creating packages");
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
  let mut join_set = JoinSet::new();

  for (index, job) in jobs.into_iter().enumerate() {
    let config = config.clone();
    let cache = cache.clone();
    let runner = runner.clone();
    let cancel = cancel.clone();
    let semaphore = semaphore.clone();

    join_set.spawn(async move {
      let name = format!("{}/{}", job.recipe.name(), job.recipe.version());
      let Ok(_permit) = semaphore.acquire().await else {
        return (index, name, None);
      };
      let result = match Lifecycle::new(job.recipe, job.settings, config, &cache, runner.as_ref(), cancel) {
        Ok(mut lifecycle) => lifecycle.run().await,
        Err(err) => Err(err),
      };
      (index, name, Some(result))
    });
  }

  let mut results = Vec::new();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((index, name, Some(result))) => results.push((index, name, result)),
      Ok((_, name, None)) => error!(recipe = %name, "semaphore closed before job started"),
      Err(e) => error!(error = %e, "create task panicked"),
    }
  }

  results.sort_by_key(|(index, _, _)| *index);
  results.into_iter().map(|(_, name, result)| (name, result)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collect::ArtifactRule;
  use crate::execute::ProcessRunner;
  use crate::execute::types::StageError;
  use crate::export::PackageInfo;
  use crate::recipe::{DeclaredStages, StageAction, StageKind};
  use crate::util::testutil::write_file_script;
  use tempfile::TempDir;

  fn library_recipe(name: &str) -> Recipe {
    let lib = format!("lib{}.a", name);
    let stages = DeclaredStages::new()
      .action(StageKind::Build, StageAction::run(write_file_script(&format!("out/{}", lib), "archive")))
      .unwrap()
      .package_rule(ArtifactRule::new("*.a", "lib").flatten())
      .info(PackageInfo {
        libs: vec![name.to_string()],
        ..Default::default()
      });
    Recipe::builder(name, "1.0").stages(stages).build().unwrap()
  }

  #[tokio::test]
  async fn creates_independent_recipes() {
    let cache_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();
    let cache = PackageCache::new(cache_dir.path());
    let config = ExecuteConfig {
      parallelism: 2,
      work_root: Some(work_dir.path().to_path_buf()),
      ..Default::default()
    };
    let jobs = ["depA", "depB", "depC"]
      .into_iter()
      .map(|name| CreateJob {
        recipe: library_recipe(name),
        settings: Settings::detect(),
      })
      .collect();

    let results = create_many(jobs, &config, &cache, Arc::new(ProcessRunner), CancellationToken::new()).await;

    let names: Vec<_> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["depA/1.0", "depB/1.0", "depC/1.0"]);
    for (_, result) in &results {
      assert!(result.is_ok());
    }
    assert_eq!(cache.list().unwrap().len(), 3);
  }

  #[tokio::test]
  async fn one_failure_does_not_stop_others() {
    let cache_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();
    let cache = PackageCache::new(cache_dir.path());
    let config = ExecuteConfig {
      work_root: Some(work_dir.path().to_path_buf()),
      ..Default::default()
    };
    let broken = Recipe::builder("broken", "1.0")
      .stages(
        DeclaredStages::new()
          .action(StageKind::Build, StageAction::run("exit 1"))
          .unwrap(),
      )
      .build()
      .unwrap();
    let jobs = vec![
      CreateJob {
        recipe: broken,
        settings: Settings::detect(),
      },
      CreateJob {
        recipe: library_recipe("depA"),
        settings: Settings::detect(),
      },
    ];

    let results = create_many(jobs, &config, &cache, Arc::new(ProcessRunner), CancellationToken::new()).await;

    assert!(matches!(
      results[0].1,
      Err(LifecycleError {
        error: StageError::Build(_),
        ..
      })
    ));
    assert!(results[1].1.is_ok());
  }
}
