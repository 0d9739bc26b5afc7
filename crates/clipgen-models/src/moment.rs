//! Selected clip windows.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a moment was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MomentSource {
    /// Picked from scored transcript chunks
    Scored,
    /// Evenly distributed over the source
    Fallback,
}

/// Selection method reported in job results.
pub type SelectionMethod = MomentSource;

impl MomentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MomentSource::Scored => "scored",
            MomentSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for MomentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(start, duration)` window of the source destined to become one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Moment {
    /// Position in the selection, used to reassemble render results.
    pub index: usize,
    pub start: f64,
    pub duration: f64,
    pub source: MomentSource,
    pub score_label: String,
}

impl Moment {
    pub fn new(
        index: usize,
        start: f64,
        duration: f64,
        source: MomentSource,
        score_label: impl Into<String>,
    ) -> Self {
        Self {
            index,
            start,
            duration,
            source,
            score_label: score_label.into(),
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// File name stem for this moment's clip.
    pub fn clip_name(&self) -> String {
        format!("clip_{:02}", self.index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moment_end_and_name() {
        let m = Moment::new(2, 10.0, 16.8, MomentSource::Fallback, "fallback");
        assert!((m.end() - 26.8).abs() < 1e-9);
        assert_eq!(m.clip_name(), "clip_03");
    }

    #[test]
    fn test_source_serde() {
        assert_eq!(serde_json::to_string(&MomentSource::Scored).unwrap(), "\"scored\"");
        assert_eq!(MomentSource::Fallback.to_string(), "fallback");
    }
}
