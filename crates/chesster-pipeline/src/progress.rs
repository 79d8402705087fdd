use std::path::{Path, PathBuf};
use std::sync::Arc;

use chesster_core::{append_line_with_rotation, LogRotationPolicy};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::stage::PipelineStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Orchestrator-authored milestone.
    Status,
    /// Verbatim subprocess output line.
    Log,
}

/// One event on the progress stream consumed by the presentation layer.
///
/// `percent` is `None` whenever an event carries no bar update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Stage {
        stage: PipelineStage,
        message: String,
        percent: Option<f64>,
        kind: ProgressKind,
    },
    Bootstrap {
        message: String,
        percent: Option<f64>,
    },
    Done {
        session_id: String,
        artifact_path: Option<PathBuf>,
        message: String,
    },
    Failed {
        stage: Option<PipelineStage>,
        message: String,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }

    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::Stage { percent, .. } | Self::Bootstrap { percent, .. } => *percent,
            Self::Done { .. } => Some(100.0),
            Self::Failed { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Stage { message, .. }
            | Self::Bootstrap { message, .. }
            | Self::Done { message, .. }
            | Self::Failed { message, .. } => message,
        }
    }
}

#[derive(Debug)]
struct EventJournal {
    path: PathBuf,
    policy: LogRotationPolicy,
}

/// Append-only, non-blocking sink for [`ProgressEvent`]s.
///
/// Clones share the same receiver, so engine and pipeline code may emit
/// concurrently. Emitting after the receiver is gone is a silent no-op.
#[derive(Debug, Clone, Default)]
pub struct ProgressChannel {
    sender: Option<UnboundedSender<ProgressEvent>>,
    journal: Option<Arc<EventJournal>>,
}

impl ProgressChannel {
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
                journal: None,
            },
            receiver,
        )
    }

    /// A channel that drops every event.
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Returns a clone that also appends every event as one JSON line to `path`.
    pub fn with_journal(&self, path: &Path, policy: LogRotationPolicy) -> Self {
        Self {
            sender: self.sender.clone(),
            journal: Some(Arc::new(EventJournal {
                path: path.to_path_buf(),
                policy,
            })),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(journal) = self.journal.as_ref() {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if let Err(error) =
                        append_line_with_rotation(&journal.path, &line, journal.policy)
                    {
                        tracing::warn!(
                            path = %journal.path.display(),
                            error = %format!("{error:#}"),
                            "failed to journal progress event"
                        );
                    }
                }
                Err(error) => tracing::warn!(%error, "failed to encode progress event"),
            }
        }
        if let Some(sender) = self.sender.as_ref() {
            if sender.send(event).is_err() {
                tracing::trace!("progress receiver dropped");
            }
        }
    }

    pub fn stage_status(
        &self,
        stage: PipelineStage,
        message: impl Into<String>,
        percent: Option<f64>,
    ) {
        self.emit(ProgressEvent::Stage {
            stage,
            message: message.into(),
            percent,
            kind: ProgressKind::Status,
        });
    }

    pub fn stage_log(
        &self,
        stage: PipelineStage,
        message: impl Into<String>,
        percent: Option<f64>,
    ) {
        self.emit(ProgressEvent::Stage {
            stage,
            message: message.into(),
            percent,
            kind: ProgressKind::Log,
        });
    }

    pub fn bootstrap(&self, message: impl Into<String>, percent: Option<f64>) {
        self.emit(ProgressEvent::Bootstrap {
            message: message.into(),
            percent,
        });
    }
}
