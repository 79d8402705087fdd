use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chesster_engine::{
    BinaryResolver, EngineError, EngineSession, EngineSessionConfig, FixedResolver,
    SearchPathResolver,
};
use chesster_process::TokioProcessLauncher;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::PlayArgs;

const QUIT_COMMAND: &str = ":quit";
const LOAD_COMMAND: &str = ":load";

pub(crate) async fn run_play(args: &PlayArgs) -> Result<()> {
    let resolver: Arc<dyn BinaryResolver> = match args.engine.as_ref() {
        Some(path) => Arc::new(FixedResolver::new(Some(path.clone()))),
        None => Arc::new(SearchPathResolver::new(&args.engine_name).with_candidate_dir("bin")),
    };
    let config = EngineSessionConfig {
        handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
        ready_timeout: Duration::from_millis(args.ready_timeout_ms),
        move_timeout: Duration::from_millis(args.move_timeout_ms),
        ..EngineSessionConfig::default()
    };
    let mut session = EngineSession::new(Arc::new(TokioProcessLauncher), resolver, config);
    session
        .load(&args.weights)
        .await
        .map_err(|error| anyhow!(describe_engine_error(&error)))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == QUIT_COMMAND {
            break;
        }
        if let Some(weights) = input.strip_prefix(LOAD_COMMAND) {
            let weights = Path::new(weights.trim());
            match session.load(weights).await {
                Ok(()) => println!("loaded {}", weights.display()),
                Err(error) => eprintln!("{}", describe_engine_error(&error)),
            }
            continue;
        }
        match session.get_move(input).await {
            Ok(best_move) => println!("bestmove {best_move}"),
            Err(error) => eprintln!("{}", describe_engine_error(&error)),
        }
    }

    session.unload().await;
    Ok(())
}

fn describe_engine_error(error: &EngineError) -> String {
    format!(
        "engine error: {error} (suggested action: {})",
        error.remediation().as_str()
    )
}
