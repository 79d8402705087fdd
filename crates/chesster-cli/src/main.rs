mod bootstrap_helpers;
mod play;
mod training;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chesster_pipeline::{
    base_model_filename, clean_pgn_file, closest_bracket, load_pipeline_config,
    save_pipeline_config, PipelineConfig,
};
use clap::{Args, Parser, Subcommand};

use crate::bootstrap_helpers::init_tracing;

#[derive(Debug, Parser)]
#[command(
    name = "chesster",
    about = "Play against personalised chess engines and train them from your games",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "CHESSTER_CONFIG",
        default_value = ".chesster/pipeline.json",
        help = "Pipeline configuration file (JSON); defaults apply when it does not exist"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer FEN positions from stdin with the engine's move.
    Play(PlayArgs),
    /// Train a personalised model from a game history.
    Train(TrainArgs),
    /// Run the one-time image build and calibration if still pending.
    Setup,
    /// Show the base model bracket closest to a rating.
    Bracket {
        #[arg(long)]
        elo: u32,
    },
    /// Normalise a PGN file the way the clean stage does.
    CleanPgn { input: PathBuf, output: PathBuf },
    /// Write the default pipeline configuration to the --config path.
    InitConfig {
        #[arg(long, help = "Overwrite an existing configuration file")]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub(crate) struct PlayArgs {
    #[arg(long, help = "Weights file to load into the engine")]
    pub(crate) weights: PathBuf,

    #[arg(
        long,
        env = "CHESSTER_ENGINE",
        help = "Engine executable; otherwise searched in ./bin and PATH"
    )]
    pub(crate) engine: Option<PathBuf>,

    #[arg(long, default_value = "lc0", help = "Engine executable name used for the search")]
    pub(crate) engine_name: String,

    #[arg(long, default_value_t = 10_000)]
    pub(crate) handshake_timeout_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    pub(crate) ready_timeout_ms: u64,

    #[arg(long, default_value_t = 8_000)]
    pub(crate) move_timeout_ms: u64,
}

#[derive(Debug, Args)]
pub(crate) struct TrainArgs {
    #[arg(long)]
    pub(crate) username: String,

    #[arg(long, help = "Game history in PGN format")]
    pub(crate) pgn: PathBuf,

    #[arg(long, help = "Declared rating; the closest supported bracket is used")]
    pub(crate) elo: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Play(args) => play::run_play(&args).await,
        Command::Train(args) => {
            let config = load_pipeline_config(&cli.config)?;
            training::run_train(config, &args).await
        }
        Command::Setup => {
            let config = load_pipeline_config(&cli.config)?;
            training::run_setup(config).await
        }
        Command::Bracket { elo } => {
            let bracket = closest_bracket(elo);
            println!("bracket: {bracket}");
            println!("base model: {}", base_model_filename(bracket));
            Ok(())
        }
        Command::CleanPgn { input, output } => {
            let games = clean_pgn_file(&input, &output)
                .with_context(|| format!("failed to clean {}", input.display()))?;
            println!("Cleaned {games} games -> {}", output.display());
            Ok(())
        }
        Command::InitConfig { force } => {
            if cli.config.exists() && !force {
                bail!(
                    "{} already exists (pass --force to overwrite)",
                    cli.config.display()
                );
            }
            save_pipeline_config(&cli.config, &PipelineConfig::default())?;
            println!("wrote {}", cli.config.display());
            Ok(())
        }
    }
}
