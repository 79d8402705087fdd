use std::sync::Arc;

use anyhow::{Context, Result};
use chesster_pipeline::{PipelineConfig, ProgressChannel, TrainingOrchestrator, TrainingRequest};
use chesster_process::TokioProcessLauncher;
use tokio::task::JoinHandle;

use crate::TrainArgs;

pub(crate) async fn run_train(config: PipelineConfig, args: &TrainArgs) -> Result<()> {
    let (progress, printer) = spawn_event_printer();
    let orchestrator = TrainingOrchestrator::new(config, Arc::new(TokioProcessLauncher), progress);
    let request = TrainingRequest::new(&args.username, &args.pgn, args.elo);
    let result = orchestrator.run(&request).await;
    drop(orchestrator);
    printer.await.context("progress printer task failed")?;

    let run = result.with_context(|| format!("training for '{}' failed", args.username))?;
    tracing::info!(
        session_id = %run.session_id,
        output_dir = %run.output_dir.display(),
        "training complete"
    );
    Ok(())
}

pub(crate) async fn run_setup(config: PipelineConfig) -> Result<()> {
    let (progress, printer) = spawn_event_printer();
    let orchestrator = TrainingOrchestrator::new(config, Arc::new(TokioProcessLauncher), progress);
    let bootstrapper = orchestrator.bootstrapper();
    drop(orchestrator);
    let result = bootstrapper.ensure_all().await;
    drop(bootstrapper);
    printer.await.context("progress printer task failed")?;
    result.context("one-time setup failed")?;
    println!("setup complete");
    Ok(())
}

/// Prints every progress event as one JSON line until all senders are dropped.
fn spawn_event_printer() -> (ProgressChannel, JoinHandle<()>) {
    let (progress, mut receiver) = ProgressChannel::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(error) => tracing::warn!(%error, "failed to encode progress event"),
            }
        }
    });
    (progress, printer)
}
