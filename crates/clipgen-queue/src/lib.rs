//! Redis Streams job queue and job store.
//!
//! This crate provides:
//! - The queue job envelope (one tagged variant per job kind)
//! - Job enqueueing and consumption via Redis Streams
//! - The job store boundary with Redis and in-memory implementations
//! - The clip-generation submission boundary

pub mod error;
pub mod job;
pub mod queue;
pub mod store;
pub mod submit;

pub use error::{QueueError, QueueResult};
pub use job::{ClipGenerationJob, ContentRepurposeJob, QueueJob, ThumbnailJob};
pub use queue::{JobQueue, QueueConfig};
pub use store::{JobStore, MemoryJobStore, RedisJobStore};
pub use submit::{submit_clip_generation, JobEnqueuer};
