//! Line-oriented plumbing for talking to opaque child processes.
//!
//! Splits raw pipe chunks into trimmed lines, forwards them through one
//! ordered channel, and lets a caller await "the next line matching P" under a
//! deadline while stderr accumulates into a bounded diagnostic tail.

pub mod diagnostic_tail;
pub mod expectation;
pub mod launcher;
pub mod line_stream;

pub use diagnostic_tail::{DiagnosticTail, DEFAULT_DIAGNOSTIC_TAIL_CHARS};
pub use expectation::{ExpectationError, ExpectationQueue};
pub use launcher::{
    ExitOutcome, LaunchSpec, LaunchedProcess, OutputLine, OutputStream, ProcessHandle,
    ProcessLauncher, TokioProcessLauncher,
};
pub use line_stream::{pump_lines, LineSplitter};
