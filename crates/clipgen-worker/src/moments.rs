//! Moment selection.
//!
//! Picks the time ranges that become clips. Transcript chunks are scored
//! when a scorer and a transcript are available. Otherwise moments are
//! spread evenly across the source. Selection itself never fails.

use std::sync::Arc;
use std::time::Duration;

use clipgen_models::{Moment, MomentSource, Transcript};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::metrics;
use crate::retry::{retry_async, RetryConfig};
use crate::scoring::MomentScorer;

/// Words per scored transcript chunk.
pub const CHUNK_WORDS: usize = 40;

pub const MIN_CLIP_SECS: f64 = 15.0;
pub const MAX_CLIP_SECS: f64 = 60.0;
/// Fraction of the source used as clip length before clamping.
pub const CLIP_FRACTION: f64 = 0.4;

/// Seconds of source per clip when deciding how many to cut.
const SECS_PER_CLIP: f64 = 60.0;

/// Scoring requests in flight per job.
const SCORING_CONCURRENCY: usize = 4;

/// Selected moments plus the strategy that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub moments: Vec<Moment>,
    pub method: MomentSource,
}

/// A contiguous run of transcript words.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptChunk {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl TranscriptChunk {
    pub fn center(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// Clip length for a source of `duration` seconds (sources of 15 s or more).
pub fn clip_duration(duration: f64) -> f64 {
    (duration * CLIP_FRACTION).clamp(MIN_CLIP_SECS, MAX_CLIP_SECS)
}

/// Number of moments to cut from a source of `duration` seconds.
pub fn target_count(duration: f64, max_clips: usize) -> usize {
    let by_length = (duration / SECS_PER_CLIP).floor() as usize;
    by_length.clamp(1, max_clips.max(1))
}

fn clamp_start(center: f64, clip: f64, duration: f64) -> f64 {
    (center - clip / 2.0).clamp(0.0, (duration - clip).max(0.0))
}

/// The single moment used for sources shorter than the minimum clip.
fn short_source_moment(duration: f64) -> Moment {
    Moment::new(0, duration * 0.1, duration * 0.8, MomentSource::Fallback, "fallback")
}

/// Evenly spaced moments.
pub fn fallback_moments(duration: f64, max_clips: usize) -> Vec<Moment> {
    if duration < MIN_CLIP_SECS {
        return vec![short_source_moment(duration)];
    }

    let n = target_count(duration, max_clips);
    let clip = clip_duration(duration);
    let spacing = duration / (n + 1) as f64;

    (0..n)
        .map(|i| {
            let center = spacing * (i + 1) as f64;
            Moment::new(
                i,
                clamp_start(center, clip, duration),
                clip,
                MomentSource::Fallback,
                "fallback",
            )
        })
        .collect()
}

/// Split a transcript into chunks of `words_per_chunk` words.
pub fn chunk_transcript(transcript: &Transcript, words_per_chunk: usize) -> Vec<TranscriptChunk> {
    transcript
        .words
        .chunks(words_per_chunk.max(1))
        .filter_map(|words| {
            let first = words.first()?;
            let last = words.last()?;
            let text = words
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            Some(TranscriptChunk {
                start: first.start,
                end: last.end.max(first.start),
                text,
            })
        })
        .collect()
}

/// Turn scored chunks into the top `n` moments, ordered by start.
pub fn moments_from_scores(
    mut scored: Vec<(TranscriptChunk, f64)>,
    duration: f64,
    n: usize,
) -> Vec<Moment> {
    let clip = clip_duration(duration);

    scored.retain(|(_, score)| *score > 0.0);
    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| a.0.start.total_cmp(&b.0.start))
    });
    scored.truncate(n);

    let mut placed: Vec<(f64, f64)> = scored
        .iter()
        .map(|(chunk, score)| (clamp_start(chunk.center(), clip, duration), *score))
        .collect();
    placed.sort_by(|a, b| a.0.total_cmp(&b.0));

    placed
        .into_iter()
        .enumerate()
        .map(|(i, (start, score))| {
            Moment::new(i, start, clip, MomentSource::Scored, format!("score {:.1}", score))
        })
        .collect()
}

/// Chooses moments for a job.
#[derive(Clone)]
pub struct MomentSelector {
    scorer: Option<Arc<dyn MomentScorer>>,
    max_clips: usize,
    scoring_timeout: Duration,
    scoring_retries: u32,
}

impl MomentSelector {
    pub fn new(scorer: Option<Arc<dyn MomentScorer>>) -> Self {
        Self {
            scorer,
            max_clips: 5,
            scoring_timeout: Duration::from_secs(30),
            scoring_retries: 2,
        }
    }

    pub fn with_max_clips(mut self, max_clips: usize) -> Self {
        self.max_clips = max_clips.max(1);
        self
    }

    pub fn with_scoring(mut self, timeout: Duration, retries: u32) -> Self {
        self.scoring_timeout = timeout;
        self.scoring_retries = retries;
        self
    }

    /// Select moments for a source of `duration` seconds.
    pub async fn select(&self, duration: f64, transcript: Option<&Transcript>) -> Selection {
        let selection = self.select_inner(duration, transcript).await;
        metrics::record_selection(selection.method);
        info!(
            method = %selection.method,
            moments = selection.moments.len(),
            duration,
            "Selected moments"
        );
        selection
    }

    async fn select_inner(&self, duration: f64, transcript: Option<&Transcript>) -> Selection {
        let fallback = || Selection {
            moments: fallback_moments(duration, self.max_clips),
            method: MomentSource::Fallback,
        };

        if duration < MIN_CLIP_SECS {
            return fallback();
        }

        let (Some(scorer), Some(transcript)) = (&self.scorer, transcript) else {
            return fallback();
        };

        let chunks = chunk_transcript(transcript, CHUNK_WORDS);
        if chunks.is_empty() {
            return fallback();
        }

        let scored = self.score_chunks(Arc::clone(scorer), chunks).await;
        let moments = moments_from_scores(scored, duration, target_count(duration, self.max_clips));
        if moments.is_empty() {
            warn!("No transcript chunk scored above zero, using evenly spaced moments");
            return fallback();
        }

        Selection {
            moments,
            method: MomentSource::Scored,
        }
    }

    /// Score every chunk, dropping the ones whose scoring failed.
    async fn score_chunks(
        &self,
        scorer: Arc<dyn MomentScorer>,
        chunks: Vec<TranscriptChunk>,
    ) -> Vec<(TranscriptChunk, f64)> {
        let retry = RetryConfig::new("score_chunk")
            .with_max_retries(self.scoring_retries)
            .with_base_delay(Duration::from_millis(500));
        let timeout = self.scoring_timeout;

        stream::iter(chunks)
            .map(move |chunk| score_chunk(Arc::clone(&scorer), retry.clone(), timeout, chunk))
            .buffer_unordered(SCORING_CONCURRENCY)
            .filter_map(|scored| async move { scored })
            .collect()
            .await
    }
}

/// Score one chunk under a timeout, retrying per `retry`.
async fn score_chunk(
    scorer: Arc<dyn MomentScorer>,
    retry: RetryConfig,
    timeout: Duration,
    chunk: TranscriptChunk,
) -> Option<(TranscriptChunk, f64)> {
    let result = retry_async(&retry, || {
        let scorer = Arc::clone(&scorer);
        let text = chunk.text.clone();
        async move {
            tokio::time::timeout(timeout, scorer.score(&text))
                .await
                .map_err(|_| WorkerError::scoring_failed("Scoring timed out"))?
        }
    })
    .await;

    match result {
        Ok(score) => Some((chunk, score)),
        Err(e) => {
            debug!(start = chunk.start, error = %e, "Dropping unscored chunk");
            None
        }
    }
}
