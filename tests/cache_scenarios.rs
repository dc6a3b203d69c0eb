//! Cache scenarios: checksum keys and reuse across runs

mod common;

use common::{execute_with, run_for};
use conveyor::cache::{CacheStore, DirCacheStore, InMemoryCacheStore};
use conveyor::core::{RunStatus, Trigger};
use conveyor::execution::JobOutcome;
use conveyor::shell::ShellRunner;
use std::sync::Arc;

// Builds a dependency tree and saves it under a checksum key
const POPULATE: &str = r#"
jobs:
  build:
    steps:
      - checkout
      - restore_cache:
          key: deps-{{ checksum "requirements.txt" }}
      - run: "mkdir -p venv && echo built > venv/marker"
      - save_cache:
          key: deps-{{ checksum "requirements.txt" }}
          paths: [venv]
workflows:
  main:
    jobs: [build]
"#;

// Fails unless a restore materialized the tree first
const VERIFY: &str = r#"
jobs:
  build:
    steps:
      - checkout
      - restore_cache:
          key: deps-{{ checksum "requirements.txt" }}
      - run: "test -f venv/marker"
workflows:
  main:
    jobs: [build]
"#;

fn source_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("requirements.txt"), "requests==2.31\n").unwrap();
    dir
}

fn trigger_from(source: &tempfile::TempDir) -> Trigger {
    Trigger::branch("main").with_source(source.path().to_path_buf())
}

#[tokio::test]
async fn test_save_then_restore_across_runs() {
    let source = source_tree();
    let cache_dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn CacheStore> = Arc::new(DirCacheStore::new(cache_dir.path()));

    let mut first = run_for(POPULATE, None, trigger_from(&source));
    let report = execute_with(ShellRunner::default(), cache.clone(), &mut first).await;
    assert_eq!(report.status, RunStatus::Succeeded);

    // The second run starts from a fresh sandbox; venv/marker can only
    // come from the restored snapshot
    let mut second = run_for(VERIFY, None, trigger_from(&source));
    let report = execute_with(ShellRunner::default(), cache, &mut second).await;
    assert_eq!(report.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_changed_checksum_misses_cache() {
    let source = source_tree();
    let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());

    let mut first = run_for(POPULATE, None, trigger_from(&source));
    execute_with(ShellRunner::default(), cache.clone(), &mut first).await;

    // Changing the file changes the rendered key; the old entry stays
    std::fs::write(source.path().join("requirements.txt"), "requests==2.32\n").unwrap();

    let mut second = run_for(VERIFY, None, trigger_from(&source));
    let report = execute_with(ShellRunner::default(), cache, &mut second).await;

    // The miss itself is not an error; the job fails at its own check,
    // not at the restore step
    assert_eq!(report.status, RunStatus::Failed);
    let build = report.jobs.iter().find(|j| j.name == "build").unwrap();
    assert_eq!(build.outcome, JobOutcome::Failed);
    assert_eq!(build.failed_step.as_deref(), Some("test -f venv/marker"));
}

#[tokio::test]
async fn test_save_is_first_write_wins() {
    let yaml = r#"
jobs:
  warm:
    steps:
      - checkout
      - run: "mkdir -p venv && touch venv/original"
      - save_cache:
          key: deps-{{ checksum "requirements.txt" }}
          paths: [venv]
  rewarm:
    steps:
      - checkout
      - run: "mkdir -p venv && touch venv/overwritten"
      - save_cache:
          key: deps-{{ checksum "requirements.txt" }}
          paths: [venv]
workflows:
  main:
    jobs:
      - warm
      - rewarm:
          requires: [warm]
"#;
    let source = source_tree();
    let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());

    let mut run = run_for(yaml, None, trigger_from(&source));
    let report = execute_with(ShellRunner::default(), cache.clone(), &mut run).await;
    assert_eq!(report.status, RunStatus::Succeeded);

    // The second save for the same key is a no-op
    let key = conveyor::cache::render_key(
        "deps-{{ checksum \"requirements.txt\" }}",
        source.path(),
    )
    .unwrap();
    let snapshot = cache.get(&key).await.unwrap().unwrap();
    assert!(snapshot
        .files()
        .any(|(path, _)| path == std::path::Path::new("venv/original")));
    assert!(!snapshot
        .files()
        .any(|(path, _)| path == std::path::Path::new("venv/overwritten")));
}
