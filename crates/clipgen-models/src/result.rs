//! Result payload of a completed clip-generation job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ClipOutcome, SelectionMethod};

/// One successfully rendered clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipSummary {
    pub moment_index: usize,
    pub output_locator: String,
    pub duration: f64,
    pub byte_size: u64,
    pub caption_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipGenerationResult {
    pub clips: Vec<ClipSummary>,
    pub total_clips: usize,
    #[serde(default)]
    pub failed_clips: usize,
    pub video_duration: f64,
    pub captions_added: bool,
    pub selection_method: SelectionMethod,
}

impl ClipGenerationResult {
    /// Aggregate render outcomes, ordered by moment index.
    pub fn from_outcomes(
        outcomes: &[ClipOutcome],
        video_duration: f64,
        selection_method: SelectionMethod,
    ) -> Self {
        let mut clips: Vec<ClipSummary> = outcomes
            .iter()
            .filter(|o| o.success)
            .filter_map(|o| {
                o.output_locator.as_ref().map(|locator| ClipSummary {
                    moment_index: o.moment_index,
                    output_locator: locator.clone(),
                    duration: o.duration,
                    byte_size: o.byte_size,
                    caption_applied: o.caption_applied,
                })
            })
            .collect();
        clips.sort_by_key(|c| c.moment_index);

        Self {
            total_clips: clips.len(),
            failed_clips: outcomes.len() - clips.len(),
            captions_added: clips.iter().any(|c| c.caption_applied),
            clips,
            video_duration,
            selection_method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClipFailure, MomentSource};

    #[test]
    fn test_from_outcomes_orders_and_counts() {
        let outcomes = vec![
            ClipOutcome::succeeded(2, "/out/clip_03.mp4", 30_000, false, 20.0),
            ClipOutcome::failed(1, ClipFailure::TranscoderFailed, "exit 1", 20.0),
            ClipOutcome::succeeded(0, "/out/clip_01.mp4", 40_000, true, 20.0),
        ];

        let result = ClipGenerationResult::from_outcomes(&outcomes, 120.0, MomentSource::Scored);
        assert_eq!(result.total_clips, 2);
        assert_eq!(result.failed_clips, 1);
        assert!(result.captions_added);
        assert_eq!(result.clips[0].moment_index, 0);
        assert_eq!(result.clips[1].moment_index, 2);
    }

    #[test]
    fn test_serialized_shape() {
        let result = ClipGenerationResult::from_outcomes(
            &[ClipOutcome::succeeded(0, "/out/a.mp4", 12_000, false, 16.8)],
            42.0,
            MomentSource::Fallback,
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["selection_method"], "fallback");
        assert_eq!(value["total_clips"], 1);
        assert_eq!(value["captions_added"], false);
        assert_eq!(value["clips"][0]["output_locator"], "/out/a.mp4");
    }
}
