use std::path::PathBuf;

use thiserror::Error;

use crate::session::EngineState;

/// What the presentation layer should suggest after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// The engine binary is missing or cannot be executed.
    Reinstall,
    /// The engine is present but did not answer in time or died.
    Retry,
    /// The engine answered but refused the request or its inputs.
    Reconfigure,
}

impl Remediation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reinstall => "reinstall",
            Self::Retry => "retry",
            Self::Reconfigure => "reconfigure",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine binary not found (searched: {searched})")]
    BinaryNotFound { searched: String },
    #[error("failed to spawn engine binary {path}: {source}")]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("engine handshake timed out after {timeout_ms}ms waiting for '{awaiting}'; recent stderr: {stderr_tail:?}")]
    HandshakeTimeout {
        awaiting: &'static str,
        timeout_ms: u64,
        stderr_tail: String,
    },
    #[error("engine move request timed out after {timeout_ms}ms; recent stderr: {stderr_tail:?}")]
    MoveRequestTimeout { timeout_ms: u64, stderr_tail: String },
    #[error("engine is not ready (state: {state})")]
    NotReady { state: EngineState },
    #[error("engine process exited unexpectedly; recent stderr: {stderr_tail:?}")]
    EngineExited { stderr_tail: String },
    #[error("engine rejected the request: {reply}")]
    Rejected { reply: String },
    #[error("invalid position: {reason}")]
    InvalidPosition { reason: String },
    #[error("engine i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::BinaryNotFound { .. } | Self::SpawnFailed { .. } => Remediation::Reinstall,
            Self::HandshakeTimeout { .. }
            | Self::MoveRequestTimeout { .. }
            | Self::EngineExited { .. }
            | Self::Io(_) => Remediation::Retry,
            Self::NotReady { .. } | Self::Rejected { .. } | Self::InvalidPosition { .. } => {
                Remediation::Reconfigure
            }
        }
    }

    /// Captured engine stderr, when the failure carries any.
    pub fn stderr_tail(&self) -> Option<&str> {
        match self {
            Self::HandshakeTimeout { stderr_tail, .. }
            | Self::MoveRequestTimeout { stderr_tail, .. }
            | Self::EngineExited { stderr_tail } => Some(stderr_tail),
            _ => None,
        }
    }
}
