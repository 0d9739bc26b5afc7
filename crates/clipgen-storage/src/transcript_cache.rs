//! Transcript cache helpers.
//!
//! Transcripts are stored as gzip-compressed JSON keyed by the SHA-256 of
//! the audio they were produced from, so re-processing the same source
//! never calls the transcription service twice.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use clipgen_models::Transcript;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::error::{StorageError, StorageResult};

/// Content reference (hex SHA-256) of an in-memory blob.
pub fn content_ref_for_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Content reference (hex SHA-256) of a file, read in chunks.
pub async fn content_ref_for_file(path: &Path) -> StorageResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Generate the cache key for a transcript.
///
/// Format: `transcripts/{content_ref}.json.gz`
pub fn transcript_cache_key(content_ref: &str) -> String {
    format!("transcripts/{}.json.gz", content_ref)
}

/// Serialize and gzip a transcript.
pub fn compress_transcript(transcript: &Transcript) -> StorageResult<Vec<u8>> {
    let json = serde_json::to_vec(transcript)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(|e| {
        StorageError::Serialization(format!("Failed to gzip transcript: {}", e))
    })?;

    encoder.finish().map_err(|e| {
        StorageError::Serialization(format!("Failed to finish gzip encoding: {}", e))
    })
}

/// Decompress and parse a cached transcript.
///
/// Returns `None` if the data is corrupt (treated as cache miss).
pub fn decompress_transcript(data: &[u8]) -> Option<Transcript> {
    let mut decoder = GzDecoder::new(data);
    let mut json = Vec::new();

    if let Err(e) = decoder.read_to_end(&mut json) {
        warn!(error = %e, "Failed to decompress transcript cache");
        return None;
    }

    match serde_json::from_slice(&json) {
        Ok(transcript) => Some(transcript),
        Err(e) => {
            warn!(error = %e, "Failed to parse cached transcript");
            None
        }
    }
}

/// Result of storing a transcript, including actual compressed size.
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub key: String,
    pub compressed_size: u64,
}

/// Content-addressed transcript cache.
#[derive(Clone)]
pub struct TranscriptCache {
    backend: Arc<dyn CacheBackend>,
}

impl TranscriptCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Load a transcript.
    ///
    /// Returns `None` if:
    /// - The key doesn't exist
    /// - The backend read fails
    /// - Decompression fails (corrupt data)
    pub async fn load(&self, content_ref: &str) -> Option<Transcript> {
        let key = transcript_cache_key(content_ref);

        let data = match self.backend.get(&key).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(key = %key, "Transcript cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Transcript cache miss (read failed)");
                return None;
            }
        };

        match decompress_transcript(&data) {
            Some(transcript) => {
                debug!(key = %key, words = transcript.words.len(), "Transcript cache hit");
                Some(transcript)
            }
            None => {
                debug!(key = %key, "Transcript cache miss (corrupt data)");
                None
            }
        }
    }

    /// Store a transcript (gzip-compressed).
    pub async fn store(&self, content_ref: &str, transcript: &Transcript) -> StorageResult<StoreResult> {
        let key = transcript_cache_key(content_ref);
        let compressed = compress_transcript(transcript)?;
        let compressed_size = compressed.len() as u64;

        debug!(
            key = %key,
            compressed_size = compressed_size,
            "Storing transcript"
        );

        self.backend.put(&key, compressed).await?;

        Ok(StoreResult {
            key,
            compressed_size,
        })
    }

    pub async fn exists(&self, content_ref: &str) -> bool {
        self.backend
            .exists(&transcript_cache_key(content_ref))
            .await
            .unwrap_or(false)
    }

    pub async fn delete(&self, content_ref: &str) -> StorageResult<()> {
        self.backend.delete(&transcript_cache_key(content_ref)).await
    }
}
