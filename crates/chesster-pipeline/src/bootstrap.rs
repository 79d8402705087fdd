use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chesster_core::write_text_atomic;
use chesster_process::{DiagnosticTail, LaunchSpec, ProcessLauncher};

use crate::error::{BootstrapStep, PipelineError};
use crate::progress::ProgressChannel;
use crate::runner::{stream_to_exit, STAGE_OUTPUT_TAIL_CHARS};

pub const IMAGE_MARKER_FILE: &str = "image-built";
pub const CALIBRATION_MARKER_FILE: &str = "bootstrap-done";

/// Sentinel files whose existence records completed one-time setup.
///
/// Markers are only ever created. The exists-then-run-then-write sequence is
/// not locked, so two processes starting cold can both run the same setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMarkers {
    state_dir: PathBuf,
}

impl BootstrapMarkers {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn path(&self, step: BootstrapStep) -> PathBuf {
        match step {
            BootstrapStep::Image => self.state_dir.join(IMAGE_MARKER_FILE),
            BootstrapStep::Calibration => self.state_dir.join(CALIBRATION_MARKER_FILE),
        }
    }

    pub fn is_done(&self, step: BootstrapStep) -> bool {
        self.path(step).is_file()
    }

    pub fn mark_done(&self, step: BootstrapStep) -> anyhow::Result<()> {
        let path = self.path(step);
        write_text_atomic(&path, "")?;
        tracing::info!(marker = %path.display(), "bootstrap marker written");
        Ok(())
    }
}

/// Commands for each one-time setup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPlan {
    pub image_build: LaunchSpec,
    /// Absent when no calibration script is configured; the step then only records its marker.
    pub calibration: Option<LaunchSpec>,
    pub timeout: Duration,
}

/// Runs missing one-time setup steps and records their markers.
#[derive(Clone)]
pub struct Bootstrapper {
    launcher: Arc<dyn ProcessLauncher>,
    markers: BootstrapMarkers,
    plan: BootstrapPlan,
    progress: ProgressChannel,
}

impl Bootstrapper {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        markers: BootstrapMarkers,
        plan: BootstrapPlan,
        progress: ProgressChannel,
    ) -> Self {
        Self {
            launcher,
            markers,
            plan,
            progress,
        }
    }

    pub fn markers(&self) -> &BootstrapMarkers {
        &self.markers
    }

    pub fn with_progress(&self, progress: ProgressChannel) -> Self {
        Self {
            progress,
            ..self.clone()
        }
    }

    /// Builds the container image unless its marker exists. Returns whether a build ran.
    pub async fn ensure_image(&self) -> Result<bool, PipelineError> {
        if self.markers.is_done(BootstrapStep::Image) {
            return Ok(false);
        }
        let spec = self.plan.image_build.clone();
        self.run_step(BootstrapStep::Image, &spec).await?;
        Ok(true)
    }

    /// Runs the calibration script unless its marker exists. Returns whether anything ran.
    pub async fn ensure_calibration(&self) -> Result<bool, PipelineError> {
        if self.markers.is_done(BootstrapStep::Calibration) {
            return Ok(false);
        }
        match self.plan.calibration.clone() {
            Some(spec) => self.run_step(BootstrapStep::Calibration, &spec).await?,
            None => self.markers.mark_done(BootstrapStep::Calibration)?,
        }
        Ok(true)
    }

    pub async fn ensure_all(&self) -> Result<(), PipelineError> {
        self.ensure_image().await?;
        self.ensure_calibration().await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self, spec), fields(command = %spec.display()))]
    async fn run_step(&self, step: BootstrapStep, spec: &LaunchSpec) -> Result<(), PipelineError> {
        self.progress
            .bootstrap(format!("running one-time {step} setup"), None);
        let mut launched =
            self.launcher
                .launch(spec)
                .await
                .map_err(|error| PipelineError::BootstrapFailure {
                    step,
                    reason: format!("failed to start {}: {error}", spec.program.display()),
                    output_tail: String::new(),
                })?;

        let tail = DiagnosticTail::with_capacity(STAGE_OUTPUT_TAIL_CHARS);
        let progress = self.progress.clone();
        let streamed = tokio::time::timeout(
            self.plan.timeout,
            stream_to_exit(&mut launched, &tail, |line| {
                progress.bootstrap(line.text.clone(), None)
            }),
        )
        .await;

        let outcome = match streamed {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                return Err(PipelineError::BootstrapFailure {
                    step,
                    reason: format!("failed to wait for setup process: {error}"),
                    output_tail: tail.snapshot(),
                })
            }
            Err(_) => {
                if let Err(error) = launched.handle.kill().await {
                    tracing::warn!(%error, "failed to kill timed out bootstrap process");
                }
                return Err(PipelineError::BootstrapTimeout {
                    step,
                    timeout_ms: u64::try_from(self.plan.timeout.as_millis()).unwrap_or(u64::MAX),
                    output_tail: tail.snapshot(),
                });
            }
        };
        if !outcome.success() {
            return Err(PipelineError::BootstrapFailure {
                step,
                reason: outcome.describe(),
                output_tail: tail.snapshot(),
            });
        }

        self.markers.mark_done(step)?;
        self.progress
            .bootstrap(format!("one-time {step} setup complete"), None);
        Ok(())
    }
}
