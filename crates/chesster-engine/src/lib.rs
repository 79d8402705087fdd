//! Engine session management for the move-generating engine subprocess.
//!
//! One [`EngineSession`] owns at most one engine child at a time, drives the
//! UCI handshake to readiness, and answers single-position move requests.

pub mod error;
pub mod resolver;
pub mod session;
pub mod uci;

pub use error::{EngineError, Remediation};
pub use resolver::{BinaryResolver, FixedResolver, SearchPathResolver};
pub use session::{EngineSession, EngineSessionConfig, EngineState};
