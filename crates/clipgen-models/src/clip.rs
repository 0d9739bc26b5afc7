//! Per-moment render outcome.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Why a clip render failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipFailure {
    /// Transcoder exceeded its timeout
    Timeout,
    /// Transcoder exited non-zero or could not be spawned
    TranscoderFailed,
    /// GPU ran out of memory or encoder sessions
    AcceleratorBusy,
    /// Output missing or below the minimum size
    OutputInvalid,
    /// Local filesystem error around the render
    Io,
}

impl ClipFailure {
    /// Failures worth retrying the whole job for.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClipFailure::Timeout | ClipFailure::AcceleratorBusy)
    }
}

/// Result of attempting to render one moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipOutcome {
    pub moment_index: usize,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_locator: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ClipFailure>,

    #[serde(default)]
    pub byte_size: u64,
    #[serde(default)]
    pub caption_applied: bool,
    pub duration: f64,
}

impl ClipOutcome {
    pub fn succeeded(
        moment_index: usize,
        output_locator: impl Into<String>,
        byte_size: u64,
        caption_applied: bool,
        duration: f64,
    ) -> Self {
        Self {
            moment_index,
            success: true,
            output_locator: Some(output_locator.into()),
            error_message: None,
            failure: None,
            byte_size,
            caption_applied,
            duration,
        }
    }

    pub fn failed(
        moment_index: usize,
        failure: ClipFailure,
        error_message: impl Into<String>,
        duration: f64,
    ) -> Self {
        Self {
            moment_index,
            success: false,
            output_locator: None,
            error_message: Some(error_message.into()),
            failure: Some(failure),
            byte_size: 0,
            caption_applied: false,
            duration,
        }
    }

    pub fn is_transient_failure(&self) -> bool {
        !self.success && self.failure.is_some_and(|f| f.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        let ok = ClipOutcome::succeeded(0, "/out/clip_01.mp4", 20_000, true, 16.8);
        assert!(ok.success);
        assert!(ok.error_message.is_none());
        assert!(!ok.is_transient_failure());

        let timed_out = ClipOutcome::failed(1, ClipFailure::Timeout, "timed out", 16.8);
        assert!(!timed_out.success);
        assert!(timed_out.output_locator.is_none());
        assert!(timed_out.is_transient_failure());

        let broken = ClipOutcome::failed(2, ClipFailure::OutputInvalid, "too small", 16.8);
        assert!(!broken.is_transient_failure());

        let busy = ClipOutcome::failed(3, ClipFailure::AcceleratorBusy, "out of memory", 16.8);
        assert!(busy.is_transient_failure());
    }
}
