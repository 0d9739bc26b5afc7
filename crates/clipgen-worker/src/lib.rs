//! Clip generation worker.
//!
//! This crate provides:
//! - Job executor over the Redis Streams queue
//! - The clip generation orchestrator and its retry state machine
//! - Transcript acquisition, moment selection and render scheduling
//! - Per-kind job handlers
//! - Structured job logging and Prometheus metrics

pub mod clip_pipeline;
pub mod config;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod moments;
pub mod orchestrator;
pub mod retry;
pub mod scoring;
pub mod transcript;

pub use clip_pipeline::{RenderProgress, RenderScheduler};
pub use config::WorkerConfig;
pub use error::{ErrorClass, WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use handlers::{JobHandlers, ThumbnailHandler};
pub use logging::JobLogger;
pub use moments::{MomentSelector, Selection};
pub use orchestrator::JobOrchestrator;
pub use retry::{RetryDecision, RetryPolicy};
pub use scoring::{GeminiScorer, MomentScorer};
pub use transcript::{TranscriptAcquirer, TranscriptionService, WhisperClient};
