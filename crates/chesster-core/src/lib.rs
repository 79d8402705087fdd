//! Low-level filesystem and clock helpers shared by the Chesster crates.
//!
//! Provides crash-safe writes for bootstrap markers and stored model
//! artifacts, the unix-millisecond clock used for run identifiers, and the
//! size-rotated JSONL appender behind per-run event logs.

pub mod atomic_io;
pub mod log_rotation;
pub mod time_utils;

pub use atomic_io::{copy_file_atomic, write_text_atomic};
pub use log_rotation::{append_line_with_rotation, LogRotationPolicy};
pub use time_utils::current_unix_timestamp_ms;
