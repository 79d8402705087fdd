use std::path::PathBuf;

use thiserror::Error;

use crate::stage::PipelineStage;

/// One-time setup step guarded by a bootstrap marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    Image,
    Calibration,
}

impl BootstrapStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Calibration => "calibration",
        }
    }
}

impl std::fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("bootstrap {step} failed before any training data was touched: {reason}; output tail: {output_tail:?}")]
    BootstrapFailure {
        step: BootstrapStep,
        reason: String,
        output_tail: String,
    },
    #[error("bootstrap {step} timed out after {timeout_ms}ms; output tail: {output_tail:?}")]
    BootstrapTimeout {
        step: BootstrapStep,
        timeout_ms: u64,
        output_tail: String,
    },
    #[error("base model {filename} is missing (expected at {})", path.display())]
    BaseArtifactMissing { filename: String, path: PathBuf },
    #[error("config template not found at {}", path.display())]
    ConfigTemplateMissing { path: PathBuf },
    #[error("config template has no '{field}:' entry to substitute")]
    ConfigFieldMissing { field: &'static str },
    #[error("stage {stage} failed: {outcome}; output tail: {output_tail:?}")]
    StageProcessFailure {
        stage: PipelineStage,
        outcome: String,
        output_tail: String,
    },
    #[error("stage {stage} could not start {program}: {source}")]
    StageSpawnFailed {
        stage: PipelineStage,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("a training run for '{username}' is already in progress")]
    RunInProgress { username: String },
    #[error("invalid training request: {reason}")]
    InvalidRequest { reason: String },
    #[error("pipeline i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl PipelineError {
    /// Stage the failure belongs to, when it happened inside one.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::StageProcessFailure { stage, .. } | Self::StageSpawnFailed { stage, .. } => {
                Some(*stage)
            }
            Self::ConfigTemplateMissing { .. } | Self::ConfigFieldMissing { .. } => {
                Some(PipelineStage::Config)
            }
            _ => None,
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(
            self,
            Self::BootstrapFailure { .. } | Self::BootstrapTimeout { .. }
        )
    }
}
