//! Training pipeline orchestration: turns a user's game history into a
//! personalised model through clean, data, config and train stages.
//!
//! Stage subprocesses stream their output through a [`ProgressChannel`];
//! one-time environment setup is gated by [`BootstrapMarkers`].

pub mod artifacts;
pub mod bootstrap;
pub mod brackets;
pub mod config;
pub mod config_template;
pub mod error;
pub mod estimator;
pub mod orchestrator;
pub mod pgn_clean;
pub mod progress;
pub mod runner;
pub mod stage;

pub use artifacts::{find_latest_artifact, store_artifact, stored_artifact_path, FoundArtifact};
pub use bootstrap::{
    BootstrapMarkers, BootstrapPlan, Bootstrapper, CALIBRATION_MARKER_FILE, IMAGE_MARKER_FILE,
};
pub use brackets::{base_model_filename, closest_bracket, RATING_BRACKETS};
pub use config::{
    load_pipeline_config, save_pipeline_config, CommandConfig, PipelineConfig,
    PIPELINE_CONFIG_SCHEMA_VERSION,
};
pub use config_template::{build_config, render_config};
pub use error::{BootstrapStep, PipelineError};
pub use estimator::{
    parse_epoch_step, EpochStepEstimator, LineCountEstimator, NoProgress, StageProgress,
};
pub use orchestrator::{PipelineRun, RunPhase, TrainingOrchestrator, TrainingRequest};
pub use pgn_clean::{clean_pgn_file, clean_pgn_text, CleanedPgn};
pub use progress::{ProgressChannel, ProgressEvent, ProgressKind};
pub use runner::StageRunner;
pub use stage::PipelineStage;
