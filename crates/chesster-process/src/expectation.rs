use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::diagnostic_tail::DiagnosticTail;
use crate::launcher::{OutputLine, OutputStream};

/// Failure to observe an expected line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpectationError {
    #[error("timed out after {timeout_ms}ms waiting for expected output; recent stderr: {stderr_tail:?}")]
    Timeout { timeout_ms: u64, stderr_tail: String },
    #[error("child output closed before expected line arrived; recent stderr: {stderr_tail:?}")]
    StreamClosed { stderr_tail: String },
}

impl ExpectationError {
    pub fn stderr_tail(&self) -> &str {
        match self {
            Self::Timeout { stderr_tail, .. } | Self::StreamClosed { stderr_tail } => stderr_tail,
        }
    }
}

/// Request/response matcher over a child's line channel.
///
/// `expect` takes `&mut self`, so at most one expectation is armed per queue;
/// stdout lines that do not satisfy it are discarded and stderr lines feed the
/// diagnostic tail.
#[derive(Debug)]
pub struct ExpectationQueue {
    lines: UnboundedReceiver<OutputLine>,
    stderr_tail: DiagnosticTail,
    closed: bool,
}

impl ExpectationQueue {
    pub fn new(lines: UnboundedReceiver<OutputLine>) -> Self {
        Self::with_tail(lines, DiagnosticTail::default())
    }

    pub fn with_tail(lines: UnboundedReceiver<OutputLine>, stderr_tail: DiagnosticTail) -> Self {
        Self {
            lines,
            stderr_tail,
            closed: false,
        }
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resolves with the first stdout line satisfying `predicate` before `timeout` elapses.
    pub async fn expect<P>(
        &mut self,
        predicate: P,
        timeout: Duration,
    ) -> Result<String, ExpectationError>
    where
        P: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, self.next_match(&predicate)).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(ExpectationError::StreamClosed {
                stderr_tail: self.stderr_tail.snapshot(),
            }),
            Err(_) => Err(ExpectationError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                stderr_tail: self.stderr_tail.snapshot(),
            }),
        }
    }

    /// Drops stdout lines that already arrived without waiting for more.
    ///
    /// Stderr lines still feed the diagnostic tail. Returns the number of stdout
    /// lines discarded.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        loop {
            match self.lines.try_recv() {
                Ok(line) if line.stream == OutputStream::Stderr => {
                    self.stderr_tail.push_line(&line.text);
                }
                Ok(line) => {
                    tracing::trace!(line = %line.text, "discarded stale child stdout");
                    discarded += 1;
                }
                Err(TryRecvError::Empty) => return discarded,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return discarded;
                }
            }
        }
    }

    async fn next_match<P>(&mut self, predicate: &P) -> Option<String>
    where
        P: Fn(&str) -> bool,
    {
        if self.closed {
            return None;
        }
        while let Some(line) = self.lines.recv().await {
            match line.stream {
                OutputStream::Stderr => {
                    tracing::trace!(line = %line.text, "child stderr");
                    self.stderr_tail.push_line(&line.text);
                }
                OutputStream::Stdout if predicate(&line.text) => return Some(line.text),
                OutputStream::Stdout => {
                    tracing::trace!(line = %line.text, "unmatched child stdout");
                }
            }
        }
        self.closed = true;
        None
    }
}
