use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chesster_core::write_text_atomic;
use chesster_process::LaunchSpec;
use serde::{Deserialize, Serialize};

use crate::bootstrap::BootstrapPlan;

pub const PIPELINE_CONFIG_SCHEMA_VERSION: u32 = 1;

/// An external command with fixed leading arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn to_launch_spec(&self) -> LaunchSpec {
        LaunchSpec::new(&self.program).args(self.args.iter().cloned())
    }
}

/// Locations and commands the training pipeline runs with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub schema_version: u32,
    /// Host directory with the training scripts; mounted at `/toolset`.
    pub toolset_dir: PathBuf,
    /// Holds the bootstrap marker files.
    pub state_dir: PathBuf,
    /// Parent of the per-run session directories; each is mounted at `/session`.
    pub runs_dir: PathBuf,
    /// Per-user trained model store; mounted at `/models` for the train stage.
    pub model_store_dir: PathBuf,
    pub base_models_dir: PathBuf,
    pub config_template_path: PathBuf,
    pub container_runtime: String,
    pub image_name: String,
    /// External cleaner invoked as `<program> <args..> <input> <output>`.
    /// The built-in cleaner runs when unset.
    pub clean_command: Option<CommandConfig>,
    /// Data extraction entry point inside the container.
    pub data_script: String,
    /// Training entry point inside the container.
    pub train_script: String,
    pub setup_script: Option<CommandConfig>,
    pub expected_data_lines: usize,
    /// Directory, relative to the run directory, scanned for trained weights.
    pub artifact_subdir: String,
    pub artifact_extensions: Vec<String>,
    pub bootstrap_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let home = PathBuf::from(".chesster");
        Self {
            schema_version: PIPELINE_CONFIG_SCHEMA_VERSION,
            toolset_dir: PathBuf::from("toolset"),
            state_dir: home.join("state"),
            runs_dir: home.join("runs"),
            model_store_dir: home.join("models"),
            base_models_dir: PathBuf::from("toolset").join("base_models"),
            config_template_path: PathBuf::from("toolset").join("config").join("transfer.yaml"),
            container_runtime: "docker".to_string(),
            image_name: "chesster-maia".to_string(),
            clean_command: None,
            data_script: "/toolset/prepare_data.sh".to_string(),
            train_script: "/toolset/train_maia.py".to_string(),
            setup_script: None,
            expected_data_lines: 200,
            artifact_subdir: "models".to_string(),
            artifact_extensions: vec!["pb.gz".to_string()],
            bootstrap_timeout_ms: 30 * 60 * 1_000,
        }
    }
}

impl PipelineConfig {
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn base_model_path(&self, filename: &str) -> PathBuf {
        self.base_models_dir.join(filename)
    }

    pub fn bootstrap_plan(&self) -> BootstrapPlan {
        BootstrapPlan {
            image_build: LaunchSpec::new(&self.container_runtime)
                .args(["build", "-t", self.image_name.as_str()])
                .arg(self.toolset_dir.display().to_string()),
            calibration: self.setup_script.as_ref().map(CommandConfig::to_launch_spec),
            timeout: self.bootstrap_timeout(),
        }
    }
}

/// Loads the pipeline config, falling back to defaults when the file is absent or blank.
pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline config {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(PipelineConfig::default());
    }
    let parsed = serde_json::from_str::<PipelineConfig>(&raw)
        .with_context(|| format!("failed to parse pipeline config {}", path.display()))?;
    if parsed.schema_version != PIPELINE_CONFIG_SCHEMA_VERSION {
        bail!(
            "unsupported pipeline config schema_version {} in {} (expected {})",
            parsed.schema_version,
            path.display(),
            PIPELINE_CONFIG_SCHEMA_VERSION
        );
    }
    Ok(parsed)
}

pub fn save_pipeline_config(path: &Path, config: &PipelineConfig) -> Result<()> {
    let mut payload =
        serde_json::to_string_pretty(config).context("failed to encode pipeline config")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write pipeline config {}", path.display()))
}
