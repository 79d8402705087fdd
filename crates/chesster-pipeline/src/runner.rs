use std::sync::Arc;

use chesster_process::{
    DiagnosticTail, ExitOutcome, LaunchSpec, LaunchedProcess, OutputLine, ProcessLauncher,
};

use crate::error::PipelineError;
use crate::estimator::StageProgress;
use crate::progress::ProgressChannel;
use crate::stage::PipelineStage;

/// Characters of combined stage output kept for failure messages.
pub const STAGE_OUTPUT_TAIL_CHARS: usize = 2_000;

/// Runs one external stage process and forwards its output as progress.
#[derive(Clone)]
pub struct StageRunner {
    launcher: Arc<dyn ProcessLauncher>,
    progress: ProgressChannel,
}

impl StageRunner {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, progress: ProgressChannel) -> Self {
        Self { launcher, progress }
    }

    /// Spawns `spec`, streams each line as a `log` event, and succeeds only on exit status 0.
    #[tracing::instrument(level = "info", skip_all, fields(stage = %stage))]
    pub async fn run(
        &self,
        stage: PipelineStage,
        spec: &LaunchSpec,
        estimator: &mut dyn StageProgress,
    ) -> Result<(), PipelineError> {
        self.progress.stage_status(
            stage,
            format!("starting {stage} stage"),
            Some(stage.interpolate(0.0)),
        );
        tracing::info!(command = %spec.display(), "stage started");

        let mut launched =
            self.launcher
                .launch(spec)
                .await
                .map_err(|source| PipelineError::StageSpawnFailed {
                    stage,
                    program: spec.program.display().to_string(),
                    source,
                })?;
        let tail = DiagnosticTail::with_capacity(STAGE_OUTPUT_TAIL_CHARS);
        let outcome = stream_to_exit(&mut launched, &tail, |line| {
            let percent = estimator
                .observe(&line.text)
                .map(|fraction| stage.interpolate(fraction));
            self.progress.stage_log(stage, line.text.clone(), percent);
        })
        .await?;

        if !outcome.success() {
            tracing::warn!(outcome = %outcome.describe(), "stage failed");
            return Err(PipelineError::StageProcessFailure {
                stage,
                outcome: outcome.describe(),
                output_tail: tail.snapshot(),
            });
        }
        tracing::info!("stage finished");
        self.progress.stage_status(
            stage,
            format!("{stage} stage complete"),
            Some(stage.interpolate(1.0)),
        );
        Ok(())
    }
}

/// Drains a launched process's output into `on_line` and `tail`, then reaps it.
pub(crate) async fn stream_to_exit<F>(
    launched: &mut LaunchedProcess,
    tail: &DiagnosticTail,
    mut on_line: F,
) -> std::io::Result<ExitOutcome>
where
    F: FnMut(&OutputLine),
{
    while let Some(line) = launched.output.recv().await {
        tail.push_line(&line.text);
        on_line(&line);
    }
    launched.handle.wait().await
}


#[cfg(test)]
mod tests {
    use chesster_process::LaunchSpec;

    use super::test_support::{ScriptedLauncher, ScriptedRun};
    use super::StageRunner;
    use crate::error::PipelineError;
    use crate::estimator::{LineCountEstimator, NoProgress};
    use crate::progress::{ProgressChannel, ProgressEvent, ProgressKind};
    use crate::stage::PipelineStage;

    fn drain(
        receiver: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
    ) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn functional_stage_lines_are_forwarded_in_order_with_interpolated_percent() {
        let launcher = ScriptedLauncher::new(vec![ScriptedRun::ok(&["one", "two"])]);
        let (progress, mut receiver) = ProgressChannel::new();
        let runner = StageRunner::new(launcher.clone(), progress);

        runner
            .run(
                PipelineStage::Data,
                &LaunchSpec::new("docker").arg("run"),
                &mut LineCountEstimator::new(4),
            )
            .await
            .expect("stage");

        let events = drain(&mut receiver);
        let logs = events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Stage {
                    message,
                    percent,
                    kind: ProgressKind::Log,
                    ..
                } => Some((message.as_str(), *percent)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(logs, vec![("one", Some(17.5)), ("two", Some(25.0))]);
        assert_eq!(events.last().and_then(ProgressEvent::percent), Some(40.0));
        assert_eq!(launcher.launched(), vec!["docker run".to_string()]);
    }

    #[tokio::test]
    async fn regression_nonzero_exit_is_stage_qualified_with_output_tail() {
        let launcher = ScriptedLauncher::new(vec![ScriptedRun::failing(
            &["reading games", "ERROR: user not found in pgn"],
            3,
        )]);
        let runner = StageRunner::new(launcher, ProgressChannel::disconnected());
        let error = runner
            .run(
                PipelineStage::Data,
                &LaunchSpec::new("docker"),
                &mut NoProgress,
            )
            .await
            .expect_err("stage must fail");
        match error {
            PipelineError::StageProcessFailure {
                stage, output_tail, ..
            } => {
                assert_eq!(stage, PipelineStage::Data);
                assert!(output_tail.contains("user not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unit_spawn_failure_reports_program() {
        let launcher = ScriptedLauncher::new(Vec::new());
        let runner = StageRunner::new(launcher, ProgressChannel::disconnected());
        let error = runner
            .run(
                PipelineStage::Clean,
                &LaunchSpec::new("/usr/bin/python3"),
                &mut NoProgress,
            )
            .await
            .expect_err("spawn fails");
        assert!(error.to_string().contains("/usr/bin/python3"));
        assert_eq!(error.stage(), Some(PipelineStage::Clean));
    }
}
