//! Cache storage for the clipgen worker.
//!
//! This crate provides:
//! - A byte-blob cache backend trait with a local-disk implementation
//! - The content-addressed transcript cache (gzip-compressed JSON)

pub mod backend;
pub mod error;
pub mod transcript_cache;

pub use backend::{CacheBackend, LocalCacheBackend};
pub use error::{StorageError, StorageResult};
pub use transcript_cache::{
    compress_transcript, content_ref_for_bytes, content_ref_for_file, decompress_transcript,
    transcript_cache_key, StoreResult, TranscriptCache,
};
