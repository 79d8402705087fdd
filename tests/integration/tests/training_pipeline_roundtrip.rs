#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chesster_pipeline::{
    BootstrapStep, PipelineConfig, PipelineError, PipelineStage, ProgressChannel, ProgressEvent,
    TrainingOrchestrator, TrainingRequest,
};
use chesster_process::TokioProcessLauncher;
use tokio::sync::mpsc::UnboundedReceiver;

const TEMPLATE: &str = "\
name: 'maia-transfer'
dataset:
  data_path: 'replace-me'  # rewritten per run
model:
  base_model: 'replace-me'
";

const HISTORY: &str = "\
[Event \"Rated Blitz\"]
[White \"alice\"]
[Black \"bob\"]

1. e4 e5
2. Nf3 Nc6 1-0

[Event \"Rated Blitz\"]
[White \"carol\"]
[Black \"alice\"]

1. d4 d5 0-1
";

/// Stands in for the container runtime. Records builds, and for `run`
/// resolves the `/session` bind mount to act on the host run directory.
const FAKE_RUNTIME: &str = r#"#!/bin/sh
state="$(dirname "$0")"
if [ "$1" = build ]; then
  echo "building $3"
  echo build >> "$state/builds.log"
  exit 0
fi
session=""
previous=""
for arg in "$@"; do
  if [ "$previous" = "-v" ]; then
    case "$arg" in
      *:/session) session="${arg%:/session}" ;;
    esac
  fi
  previous="$arg"
done
case "$*" in
  *prepare_data.sh*)
    if [ -f "$state/fail-data" ]; then
      echo 'no games for user' >&2
      exit 3
    fi
    grep -q 'Rated Blitz' "$session/cleaned.pgn" || exit 4
    i=1
    while [ "$i" -le 50 ]; do
      echo "wrote chunk $i"
      i=$((i + 1))
    done
    mkdir -p "$session/data"
    ;;
  *train_maia.py*)
    grep -q "data_path: '/session/data/'" "$session/config.yaml" || exit 5
    echo 'epoch 1 of 2'
    echo 'epoch 2 of 2'
    mkdir -p "$session/models"
    printf 'weights' > "$session/models/final.pb.gz"
    ;;
esac
"#;

struct Workspace {
    _temp: tempfile::TempDir,
    root: PathBuf,
    config: PipelineConfig,
    pgn: PathBuf,
}

fn workspace() -> Workspace {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();

    let runtime = root.join("fake-docker");
    std::fs::write(&runtime, FAKE_RUNTIME).expect("runtime");
    let mut permissions = std::fs::metadata(&runtime).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&runtime, permissions).expect("chmod");

    let toolset = root.join("toolset");
    std::fs::create_dir_all(toolset.join("base_models")).expect("toolset");
    std::fs::write(toolset.join("base_models").join("maia-1500.pb.gz"), "base").expect("base");
    std::fs::write(toolset.join("transfer.yaml"), TEMPLATE).expect("template");

    let pgn = root.join("alice.pgn");
    std::fs::write(&pgn, HISTORY).expect("pgn");

    let config = PipelineConfig {
        toolset_dir: toolset.clone(),
        state_dir: root.join("state"),
        runs_dir: root.join("runs"),
        model_store_dir: root.join("store"),
        base_models_dir: toolset.join("base_models"),
        config_template_path: toolset.join("transfer.yaml"),
        container_runtime: runtime.display().to_string(),
        expected_data_lines: 100,
        ..PipelineConfig::default()
    };
    Workspace {
        _temp: temp,
        root,
        config,
        pgn,
    }
}

fn drain(receiver: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn builds(root: &Path) -> usize {
    std::fs::read_to_string(root.join("builds.log"))
        .unwrap_or_default()
        .lines()
        .count()
}

#[tokio::test]
async fn integration_training_run_stores_model_and_skips_repeat_bootstrap() {
    let workspace = workspace();
    let (progress, mut receiver) = ProgressChannel::new();
    let orchestrator = TrainingOrchestrator::new(
        workspace.config.clone(),
        Arc::new(TokioProcessLauncher),
        progress,
    );

    let run = orchestrator
        .run(&TrainingRequest::new("alice", &workspace.pgn, 1540))
        .await
        .expect("first run");
    assert_eq!(run.bracket, 1500);
    let stored = workspace
        .root
        .join("store")
        .join(format!("alice_{}.pb.gz", run.session_id));
    assert_eq!(run.artifact_path.as_deref(), Some(stored.as_path()));
    assert_eq!(std::fs::read_to_string(&stored).expect("stored"), "weights");
    assert!(workspace.root.join("state").join("image-built").is_file());
    assert!(workspace.root.join("state").join("bootstrap-done").is_file());
    assert_eq!(builds(&workspace.root), 1);

    let config = std::fs::read_to_string(run.output_dir.join("config.yaml")).expect("config");
    assert!(config.contains("data_path: '/session/data/'  # rewritten per run"));
    assert!(config.contains("base_model: 'maia-1500.pb.gz'"));
    let journal = std::fs::read_to_string(run.output_dir.join("events.jsonl")).expect("journal");
    let last_entry: serde_json::Value =
        serde_json::from_str(journal.lines().last().expect("journal entry")).expect("json");
    assert_eq!(last_entry["event"], "done");
    assert_eq!(last_entry["session_id"], run.session_id.as_str());

    let events = drain(&mut receiver);
    assert_eq!(events.iter().filter(|event| event.is_terminal()).count(), 1);
    assert!(matches!(events.last(), Some(ProgressEvent::Done { .. })));
    let mut last = 0.0;
    for percent in events.iter().filter_map(ProgressEvent::percent) {
        assert!(percent >= last, "progress went backwards: {percent} < {last}");
        last = percent;
    }
    assert!(events.iter().any(|event| event.message() == "wrote chunk 50"));
    assert!(events.iter().any(|event| event.message() == "epoch 2 of 2"));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    orchestrator
        .run(&TrainingRequest::new("alice", &workspace.pgn, 1500))
        .await
        .expect("second run");
    assert_eq!(builds(&workspace.root), 1);
}

#[tokio::test]
async fn integration_failing_data_stage_reports_stage_and_stderr() {
    let workspace = workspace();
    std::fs::write(workspace.root.join("fail-data"), "").expect("flag");
    let (progress, mut receiver) = ProgressChannel::new();
    let orchestrator = TrainingOrchestrator::new(
        workspace.config.clone(),
        Arc::new(TokioProcessLauncher),
        progress,
    );

    let error = orchestrator
        .run(&TrainingRequest::new("alice", &workspace.pgn, 1500))
        .await
        .expect_err("data stage fails");
    match &error {
        PipelineError::StageProcessFailure {
            stage, output_tail, ..
        } => {
            assert_eq!(*stage, PipelineStage::Data);
            assert!(output_tail.contains("no games for user"), "{output_tail}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let events = drain(&mut receiver);
    let failures: Vec<_> = events.iter().filter(|event| event.is_terminal()).collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        ProgressEvent::Failed {
            stage: Some(PipelineStage::Data),
            ..
        }
    ));
    assert!(!workspace.root.join("store").exists());
}

#[tokio::test]
async fn integration_failed_image_build_leaves_bootstrap_pending() {
    let mut workspace = workspace();
    workspace.config.container_runtime = "/bin/false".to_string();
    let orchestrator = TrainingOrchestrator::new(
        workspace.config.clone(),
        Arc::new(TokioProcessLauncher),
        ProgressChannel::disconnected(),
    );

    let error = orchestrator
        .run(&TrainingRequest::new("alice", &workspace.pgn, 1500))
        .await
        .expect_err("build fails");
    assert!(matches!(
        error,
        PipelineError::BootstrapFailure {
            step: BootstrapStep::Image,
            ..
        }
    ));
    assert!(!workspace.root.join("state").join("image-built").exists());
    assert!(orchestrator.active_users().is_empty());
}
