use std::fmt;

use serde::{Deserialize, Serialize};

/// One external-process step of a training run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Clean,
    Data,
    Config,
    Train,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 4] = [Self::Clean, Self::Data, Self::Config, Self::Train];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Data => "data",
            Self::Config => "config",
            Self::Train => "train",
        }
    }

    /// Share of the overall 0..=100 scale reserved for this stage.
    pub fn slice(self) -> (f64, f64) {
        match self {
            Self::Clean => (0.0, 10.0),
            Self::Data => (10.0, 40.0),
            Self::Config => (40.0, 45.0),
            Self::Train => (45.0, 100.0),
        }
    }

    /// Maps a stage-local completion fraction onto the overall percent scale.
    pub fn interpolate(self, fraction: f64) -> f64 {
        let (start, end) = self.slice();
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        start + (end - start) * fraction
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
