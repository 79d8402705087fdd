use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chesster_process::{
    ExpectationError, ExpectationQueue, LaunchSpec, ProcessHandle, ProcessLauncher,
};

use crate::error::EngineError;
use crate::resolver::BinaryResolver;
use crate::uci;

/// Lifecycle of the engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Terminated,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeouts and protocol constants for one engine session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSessionConfig {
    /// Bound on `uci` -> `uciok`.
    pub handshake_timeout: Duration,
    /// Bound on `isready` -> `readyok`.
    pub ready_timeout: Duration,
    /// Bound on `go` -> `bestmove`.
    pub move_timeout: Duration,
    /// Prefix joined with the weights path to form the spawn argument.
    pub weights_flag: String,
    /// Option sent between `uciok` and `isready` to cap search effort.
    pub tuning_option: (String, String),
    pub search_command: String,
}

impl Default for EngineSessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(5),
            move_timeout: Duration::from_secs(8),
            weights_flag: "--weights=".to_string(),
            tuning_option: ("Nodes".to_string(), "1".to_string()),
            search_command: "go nodes 1".to_string(),
        }
    }
}

struct LiveEngine {
    handle: Box<dyn ProcessHandle>,
    expectations: ExpectationQueue,
    weights_path: PathBuf,
    /// A `go` was sent whose `bestmove` has not been consumed yet.
    search_pending: bool,
    /// The last request did not complete; stdout may hold stale replies.
    needs_resync: bool,
}

/// Owner of the single engine subprocess.
///
/// Every mutating call takes `&mut self`, so commands to the child are strictly
/// request/response and a new `load` always tears the previous child down
/// before the replacement is spawned.
pub struct EngineSession {
    launcher: Arc<dyn ProcessLauncher>,
    resolver: Arc<dyn BinaryResolver>,
    config: EngineSessionConfig,
    state: EngineState,
    live: Option<LiveEngine>,
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("state", &self.state)
            .field("weights_path", &self.weights_path())
            .field("pid", &self.live.as_ref().and_then(|live| live.handle.id()))
            .finish()
    }
}

impl EngineSession {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        resolver: Arc<dyn BinaryResolver>,
        config: EngineSessionConfig,
    ) -> Self {
        Self {
            launcher,
            resolver,
            config,
            state: EngineState::Uninitialized,
            live: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == EngineState::Ready
    }

    /// Weights file of the current (possibly not yet ready) child.
    pub fn weights_path(&self) -> Option<&Path> {
        self.live.as_ref().map(|live| live.weights_path.as_path())
    }

    /// Replaces any running engine with a fresh one serving `weights_path`.
    #[tracing::instrument(level = "info", skip(self), fields(weights = %weights_path.display()))]
    pub async fn load(&mut self, weights_path: &Path) -> Result<(), EngineError> {
        self.teardown().await;

        let Some(binary) = self.resolver.resolve() else {
            tracing::warn!(searched = %self.resolver.describe(), "engine binary not found");
            return Err(EngineError::BinaryNotFound {
                searched: self.resolver.describe(),
            });
        };

        let spec = LaunchSpec::new(&binary)
            .arg(format!(
                "{}{}",
                self.config.weights_flag,
                weights_path.display()
            ))
            .interactive();
        let launched =
            self.launcher
                .launch(&spec)
                .await
                .map_err(|source| EngineError::SpawnFailed {
                    path: binary.clone(),
                    source,
                })?;
        tracing::info!(binary = %binary.display(), pid = ?launched.handle.id(), "engine spawned");

        self.state = EngineState::Loading;
        let live = self.live.insert(LiveEngine {
            handle: launched.handle,
            expectations: ExpectationQueue::new(launched.output),
            weights_path: weights_path.to_path_buf(),
            search_pending: false,
            needs_resync: false,
        });

        match run_handshake(live, &self.config).await {
            Ok(()) => {
                self.state = EngineState::Ready;
                tracing::info!("engine ready");
                Ok(())
            }
            Err(error) => {
                // The child stays alive after a timeout; unload/load reclaims it.
                self.state = EngineState::Terminated;
                tracing::warn!(%error, "engine handshake failed");
                Err(error)
            }
        }
    }

    /// Asks the ready engine for its move in `fen`.
    ///
    /// After a timed-out or interrupted request the engine is resynchronised
    /// with `stop` and `isready` first, so a late reply to an earlier position
    /// is never returned for this one.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_move(&mut self, fen: &str) -> Result<String, EngineError> {
        let state = self.state;
        let live = match self.live.as_mut() {
            Some(live) if state == EngineState::Ready => live,
            _ => return Err(EngineError::NotReady { state }),
        };
        let position = uci::position_fen(fen)?;

        let result = request_move(live, &self.config, &position).await;
        if matches!(result, Err(EngineError::EngineExited { .. })) {
            self.state = EngineState::Terminated;
        }
        let best_move = result?;
        tracing::debug!(best_move = %best_move, "engine answered");
        Ok(best_move)
    }

    /// Kills the running engine, if any. Safe to call repeatedly.
    pub async fn unload(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };
        let pid = live.handle.id();
        if let Err(error) = live.handle.kill().await {
            tracing::warn!(?pid, %error, "failed to kill engine process");
        } else {
            tracing::info!(?pid, "engine process terminated");
        }
        self.state = EngineState::Terminated;
    }
}

async fn run_handshake(
    live: &mut LiveEngine,
    config: &EngineSessionConfig,
) -> Result<(), EngineError> {
    live.handle.write_line(uci::CMD_UCI).await?;
    live.expectations
        .expect(uci::is_uci_ok, config.handshake_timeout)
        .await
        .map_err(|error| handshake_error(error, uci::REPLY_UCI_OK))?;

    let (name, value) = &config.tuning_option;
    live.handle.write_line(&uci::set_option(name, value)).await?;
    live.handle.write_line(uci::CMD_IS_READY).await?;
    live.expectations
        .expect(uci::is_ready_ok, config.ready_timeout)
        .await
        .map_err(|error| handshake_error(error, uci::REPLY_READY_OK))?;
    Ok(())
}

async fn request_move(
    live: &mut LiveEngine,
    config: &EngineSessionConfig,
    position: &str,
) -> Result<String, EngineError> {
    if live.needs_resync {
        resync(live, config).await?;
    }
    let stale = live.expectations.discard_pending();
    if stale > 0 {
        tracing::debug!(stale, "dropped stale engine output before move request");
    }

    live.needs_resync = true;
    live.handle.write_line(position).await?;
    live.handle.write_line(&config.search_command).await?;
    live.search_pending = true;
    let reply = live
        .expectations
        .expect(uci::is_best_move, config.move_timeout)
        .await
        .map_err(move_error)?;
    live.search_pending = false;
    live.needs_resync = false;
    uci::parse_best_move(&reply)
}

/// Consumes the reply to an abandoned search, then waits for `readyok`.
async fn resync(live: &mut LiveEngine, config: &EngineSessionConfig) -> Result<(), EngineError> {
    tracing::debug!(search_pending = live.search_pending, "resynchronising engine");
    if live.search_pending {
        live.handle.write_line(uci::CMD_STOP).await?;
        live.expectations
            .expect(uci::is_best_move, config.move_timeout)
            .await
            .map_err(move_error)?;
        live.search_pending = false;
    }
    live.handle.write_line(uci::CMD_IS_READY).await?;
    live.expectations
        .expect(uci::is_ready_ok, config.ready_timeout)
        .await
        .map_err(move_error)?;
    live.needs_resync = false;
    Ok(())
}

fn move_error(error: ExpectationError) -> EngineError {
    match error {
        ExpectationError::Timeout {
            timeout_ms,
            stderr_tail,
        } => EngineError::MoveRequestTimeout {
            timeout_ms,
            stderr_tail,
        },
        ExpectationError::StreamClosed { stderr_tail } => EngineError::EngineExited { stderr_tail },
    }
}

fn handshake_error(error: ExpectationError, awaiting: &'static str) -> EngineError {
    match error {
        ExpectationError::Timeout {
            timeout_ms,
            stderr_tail,
        } => EngineError::HandshakeTimeout {
            awaiting,
            timeout_ms,
            stderr_tail,
        },
        ExpectationError::StreamClosed { stderr_tail } => EngineError::EngineExited { stderr_tail },
    }
}
