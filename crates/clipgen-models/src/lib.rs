//! Shared data models for the clipgen pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their lifecycle status and partial updates
//! - Transcripts, moments and caption tracks
//! - Render configuration and aspect ratios
//! - Submission requests and result payloads

pub mod aspect;
pub mod caption;
pub mod clip;
pub mod job;
pub mod moment;
pub mod render_config;
pub mod request;
pub mod result;
pub mod transcript;

// Re-export common types
pub use aspect::{AspectRatio, AspectRatioParseError};
pub use caption::{CaptionTrack, CaptionWord, PhraseGroup};
pub use clip::{ClipFailure, ClipOutcome};
pub use job::{Job, JobId, JobKind, JobProgress, JobStatus, JobUpdate, ParseJobFieldError};
pub use moment::{Moment, MomentSource, SelectionMethod};
pub use render_config::{Accelerator, RenderConfig};
pub use request::{resolve_source_locator, ClipGenerationRequest};
pub use result::{ClipGenerationResult, ClipSummary};
pub use transcript::{Transcript, TranscriptWord};
