use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chesster_core::{current_unix_timestamp_ms, write_text_atomic, LogRotationPolicy};
use chesster_process::{LaunchSpec, ProcessLauncher};

use crate::artifacts::{find_latest_artifact, store_artifact};
use crate::bootstrap::{BootstrapMarkers, Bootstrapper};
use crate::brackets::{base_model_filename, closest_bracket};
use crate::config::PipelineConfig;
use crate::config_template::build_config;
use crate::error::PipelineError;
use crate::estimator::{EpochStepEstimator, LineCountEstimator, NoProgress};
use crate::pgn_clean::clean_pgn_file;
use crate::progress::{ProgressChannel, ProgressEvent};
use crate::runner::StageRunner;
use crate::stage::PipelineStage;

pub const TOOLSET_MOUNT: &str = "/toolset";
pub const SESSION_MOUNT: &str = "/session";
pub const MODELS_MOUNT: &str = "/models";
pub const CLEANED_PGN_FILE: &str = "cleaned.pgn";
pub const DATA_SUBDIR: &str = "data";
pub const CONFIG_FILE: &str = "config.yaml";
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingRequest {
    pub username: String,
    pub pgn_path: PathBuf,
    pub elo: u32,
}

impl TrainingRequest {
    pub fn new(username: impl Into<String>, pgn_path: impl Into<PathBuf>, elo: u32) -> Self {
        Self {
            username: username.into(),
            pgn_path: pgn_path.into(),
            elo,
        }
    }

    /// Usernames become file names and container arguments, so only `[A-Za-z0-9._-]` is accepted.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.username.is_empty() {
            return Err(PipelineError::InvalidRequest {
                reason: "username must not be empty".to_string(),
            });
        }
        if self.username.starts_with('.')
            || !self
                .username
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        {
            return Err(PipelineError::InvalidRequest {
                reason: format!(
                    "username '{}' may only contain ASCII letters, digits, '-', '_' or '.' and must not start with '.'",
                    self.username
                ),
            });
        }
        if !self.pgn_path.is_file() {
            return Err(PipelineError::InvalidRequest {
                reason: format!("game history {} does not exist", self.pgn_path.display()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Bootstrap,
    Stage(PipelineStage),
    Done,
}

/// State of one training request from acceptance to its terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    /// Unix milliseconds at creation; names the run directory and the stored model.
    pub session_id: String,
    pub username: String,
    pub bracket: u32,
    pub output_dir: PathBuf,
    pub phase: RunPhase,
    pub artifact_path: Option<PathBuf>,
}

impl PipelineRun {
    fn new(request: &TrainingRequest, runs_dir: &Path) -> Self {
        let session_id = current_unix_timestamp_ms().to_string();
        Self {
            output_dir: runs_dir.join(format!("{}_{session_id}", request.username)),
            session_id,
            username: request.username.clone(),
            bracket: closest_bracket(request.elo),
            phase: RunPhase::Bootstrap,
            artifact_path: None,
        }
    }

    fn current_stage(&self) -> Option<PipelineStage> {
        match self.phase {
            RunPhase::Stage(stage) => Some(stage),
            RunPhase::Bootstrap | RunPhase::Done => None,
        }
    }
}

/// Drives clean -> data -> config -> train for training requests.
///
/// Every call to [`TrainingOrchestrator::run`] ends with exactly one terminal
/// `done` or `failed` event. A user may have only one run in flight at a time.
pub struct TrainingOrchestrator {
    config: PipelineConfig,
    launcher: Arc<dyn ProcessLauncher>,
    progress: ProgressChannel,
    active_users: Arc<Mutex<BTreeSet<String>>>,
    journal_policy: LogRotationPolicy,
}

impl TrainingOrchestrator {
    pub fn new(
        config: PipelineConfig,
        launcher: Arc<dyn ProcessLauncher>,
        progress: ProgressChannel,
    ) -> Self {
        Self {
            config,
            launcher,
            progress,
            active_users: Arc::new(Mutex::new(BTreeSet::new())),
            journal_policy: LogRotationPolicy::from_env(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn active_users(&self) -> Vec<String> {
        lock_unpoisoned(&self.active_users).iter().cloned().collect()
    }

    pub fn bootstrapper(&self) -> Bootstrapper {
        Bootstrapper::new(
            self.launcher.clone(),
            BootstrapMarkers::new(&self.config.state_dir),
            self.config.bootstrap_plan(),
            self.progress.clone(),
        )
    }

    #[tracing::instrument(
        level = "info",
        skip(self, request),
        fields(username = %request.username, elo = request.elo)
    )]
    pub async fn run(&self, request: &TrainingRequest) -> Result<PipelineRun, PipelineError> {
        if let Err(error) = request.validate() {
            emit_failure(&self.progress, None, &error);
            return Err(error);
        }
        let _active = match ActiveRunGuard::acquire(&self.active_users, &request.username) {
            Ok(guard) => guard,
            Err(error) => {
                emit_failure(&self.progress, None, &error);
                return Err(error);
            }
        };

        let mut run = PipelineRun::new(request, &self.config.runs_dir);
        let progress = self
            .progress
            .with_journal(&run.output_dir.join(EVENTS_FILE), self.journal_policy);
        tracing::info!(
            session_id = %run.session_id,
            bracket = run.bracket,
            "training run accepted"
        );

        match self.execute(&mut run, request, &progress).await {
            Ok(()) => {
                run.phase = RunPhase::Done;
                let message = match run.artifact_path.as_ref() {
                    Some(path) => format!("trained model saved to {}", path.display()),
                    None => "training finished without a model artifact".to_string(),
                };
                tracing::info!(
                    session_id = %run.session_id,
                    artifact = ?run.artifact_path,
                    "training run finished"
                );
                progress.emit(ProgressEvent::Done {
                    session_id: run.session_id.clone(),
                    artifact_path: run.artifact_path.clone(),
                    message,
                });
                Ok(run)
            }
            Err(error) => {
                tracing::warn!(session_id = %run.session_id, %error, "training run failed");
                emit_failure(&progress, error.stage().or(run.current_stage()), &error);
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        run: &mut PipelineRun,
        request: &TrainingRequest,
        progress: &ProgressChannel,
    ) -> Result<(), PipelineError> {
        self.bootstrapper().with_progress(progress.clone()).ensure_all().await?;

        let base_model = base_model_filename(run.bracket);
        let base_model_path = self.config.base_model_path(&base_model);
        if !base_model_path.is_file() {
            return Err(PipelineError::BaseArtifactMissing {
                filename: base_model,
                path: base_model_path,
            });
        }

        tokio::fs::create_dir_all(run.output_dir.join(DATA_SUBDIR)).await?;
        let runner = StageRunner::new(self.launcher.clone(), progress.clone());

        run.phase = RunPhase::Stage(PipelineStage::Clean);
        let cleaned = run.output_dir.join(CLEANED_PGN_FILE);
        match self.config.clean_command.as_ref() {
            Some(command) => {
                let spec = command
                    .to_launch_spec()
                    .arg(request.pgn_path.display().to_string())
                    .arg(cleaned.display().to_string());
                runner.run(PipelineStage::Clean, &spec, &mut NoProgress).await?;
            }
            None => clean_in_process(&request.pgn_path, &cleaned, progress).await?,
        }

        run.phase = RunPhase::Stage(PipelineStage::Data);
        let mut data_progress = LineCountEstimator::new(self.config.expected_data_lines);
        runner
            .run(PipelineStage::Data, &self.data_spec(run)?, &mut data_progress)
            .await?;

        run.phase = RunPhase::Stage(PipelineStage::Config);
        let config_stage = PipelineStage::Config;
        progress.stage_status(
            config_stage,
            format!("resolving training config for base model {base_model}"),
            Some(config_stage.interpolate(0.0)),
        );
        let rendered = build_config(
            &self.config.config_template_path,
            &format!("{SESSION_MOUNT}/{DATA_SUBDIR}/"),
            &base_model,
        )?;
        write_text_atomic(&run.output_dir.join(CONFIG_FILE), &rendered)?;
        progress.stage_status(
            config_stage,
            format!("wrote {CONFIG_FILE}"),
            Some(config_stage.interpolate(1.0)),
        );

        run.phase = RunPhase::Stage(PipelineStage::Train);
        tokio::fs::create_dir_all(&self.config.model_store_dir).await?;
        runner
            .run(
                PipelineStage::Train,
                &self.train_spec(run)?,
                &mut EpochStepEstimator::new(),
            )
            .await?;

        let artifact_dir = run.output_dir.join(&self.config.artifact_subdir);
        match self.collect_artifact(run, &artifact_dir).await? {
            Some(stored) => run.artifact_path = Some(stored),
            None => progress.stage_status(
                PipelineStage::Train,
                format!(
                    "training finished but no model artifact was found in {}",
                    artifact_dir.display()
                ),
                None,
            ),
        }
        Ok(())
    }

    /// Copies the newest trained artifact into the model store on a blocking task.
    async fn collect_artifact(
        &self,
        run: &PipelineRun,
        artifact_dir: &Path,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let artifact_dir = artifact_dir.to_path_buf();
        let extensions = self.config.artifact_extensions.clone();
        let store_dir = self.config.model_store_dir.clone();
        let (username, session_id) = (run.username.clone(), run.session_id.clone());
        let stored = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<PathBuf>> {
            let Some(found) = find_latest_artifact(&artifact_dir, &extensions)? else {
                return Ok(None);
            };
            store_artifact(&found, &store_dir, &username, &session_id).map(Some)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(stored)
    }

    fn container_run(
        &self,
        run: &PipelineRun,
        mount_models: bool,
    ) -> Result<LaunchSpec, PipelineError> {
        let mut spec = LaunchSpec::new(&self.config.container_runtime)
            .args(["run", "--rm"])
            .args(["-v".to_string(), bind_mount(&self.config.toolset_dir, TOOLSET_MOUNT)?])
            .args(["-v".to_string(), bind_mount(&run.output_dir, SESSION_MOUNT)?]);
        if mount_models {
            spec = spec.args([
                "-v".to_string(),
                bind_mount(&self.config.model_store_dir, MODELS_MOUNT)?,
            ]);
        }
        Ok(spec.arg(self.config.image_name.as_str()))
    }

    fn data_spec(&self, run: &PipelineRun) -> Result<LaunchSpec, PipelineError> {
        Ok(self.container_run(run, false)?.args([
            self.config.data_script.clone(),
            format!("{SESSION_MOUNT}/{CLEANED_PGN_FILE}"),
            run.username.clone(),
            format!("{SESSION_MOUNT}/{DATA_SUBDIR}"),
        ]))
    }

    fn train_spec(&self, run: &PipelineRun) -> Result<LaunchSpec, PipelineError> {
        Ok(self.container_run(run, true)?.args([
            self.config.train_script.clone(),
            format!("{SESSION_MOUNT}/{CONFIG_FILE}"),
        ]))
    }
}

fn bind_mount(host: &Path, container: &str) -> Result<String, PipelineError> {
    let host = std::path::absolute(host)?;
    Ok(format!("{}:{container}", host.display()))
}

async fn clean_in_process(
    input: &Path,
    output: &Path,
    progress: &ProgressChannel,
) -> Result<(), PipelineError> {
    let stage = PipelineStage::Clean;
    progress.stage_status(stage, "cleaning game history", Some(stage.interpolate(0.0)));
    let (input, output) = (input.to_path_buf(), output.to_path_buf());
    let destination = output.clone();
    let games = tokio::task::spawn_blocking(move || clean_pgn_file(&input, &output))
        .await
        .map_err(std::io::Error::other)??;
    progress.stage_status(
        stage,
        format!("Cleaned {games} games -> {}", destination.display()),
        Some(stage.interpolate(1.0)),
    );
    Ok(())
}

fn emit_failure(progress: &ProgressChannel, stage: Option<PipelineStage>, error: &PipelineError) {
    progress.emit(ProgressEvent::Failed {
        stage,
        message: error.to_string(),
    });
}

/// Holds a username in the active set until dropped.
struct ActiveRunGuard {
    users: Arc<Mutex<BTreeSet<String>>>,
    username: String,
}

impl ActiveRunGuard {
    fn acquire(
        users: &Arc<Mutex<BTreeSet<String>>>,
        username: &str,
    ) -> Result<Self, PipelineError> {
        if !lock_unpoisoned(users).insert(username.to_string()) {
            return Err(PipelineError::RunInProgress {
                username: username.to_string(),
            });
        }
        Ok(Self {
            users: users.clone(),
            username: username.to_string(),
        })
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        lock_unpoisoned(&self.users).remove(&self.username);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
