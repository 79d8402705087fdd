//! Best-effort completion estimates derived from free-text stage output.

use std::sync::OnceLock;

use regex::Regex;

/// Upper bound for any estimate taken while the process is still running.
pub const MAX_IN_FLIGHT_FRACTION: f64 = 0.99;

const EPOCH_STEP_PATTERN: &str = r"(?i)\b(?:epoch|step)\s*[:#]?\s*(\d+)\s*(?:of|/)\s*(\d+)";

/// Turns a stage's output lines into a stage-local completion fraction.
pub trait StageProgress: Send {
    /// Returns a fraction in `0.0..1.0` when `line` advances the estimate.
    fn observe(&mut self, line: &str) -> Option<f64>;
}

/// Never produces an estimate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl StageProgress for NoProgress {
    fn observe(&mut self, _line: &str) -> Option<f64> {
        None
    }
}

/// Fraction of an approximate expected line count seen so far.
#[derive(Debug, Clone)]
pub struct LineCountEstimator {
    expected_lines: usize,
    seen: usize,
}

impl LineCountEstimator {
    pub fn new(expected_lines: usize) -> Self {
        Self {
            expected_lines,
            seen: 0,
        }
    }
}

impl StageProgress for LineCountEstimator {
    fn observe(&mut self, _line: &str) -> Option<f64> {
        if self.expected_lines == 0 {
            return None;
        }
        self.seen = self.seen.saturating_add(1);
        let fraction = self.seen as f64 / self.expected_lines as f64;
        Some(fraction.min(MAX_IN_FLIGHT_FRACTION))
    }
}

/// Reads `epoch N of M` / `step N/M` markers from training output.
#[derive(Debug, Default, Clone)]
pub struct EpochStepEstimator {
    last: Option<f64>,
}

impl EpochStepEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

impl StageProgress for EpochStepEstimator {
    fn observe(&mut self, line: &str) -> Option<f64> {
        let fraction = parse_epoch_step(line)?;
        self.last = Some(fraction);
        Some(fraction)
    }
}

/// Parses the last `epoch|step N of|/ M` marker on `line` as a clamped fraction.
pub fn parse_epoch_step(line: &str) -> Option<f64> {
    let captures = epoch_step_regex().captures_iter(line).last()?;
    let current = captures.get(1)?.as_str().parse::<u64>().ok()?;
    let total = captures.get(2)?.as_str().parse::<u64>().ok()?;
    if total == 0 {
        return None;
    }
    let fraction = current as f64 / total as f64;
    Some(fraction.clamp(0.0, MAX_IN_FLIGHT_FRACTION))
}

fn epoch_step_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(EPOCH_STEP_PATTERN).expect("epoch/step pattern compiles"))
}
