//! Worker error types.

use clipgen_media::MediaError;
use clipgen_queue::QueueError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// How the orchestrator reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fail the job immediately.
    Fatal,
    /// Retry with backoff until the retry ceiling.
    Transient,
    /// Absorbed by the component that raised it.
    Degradable,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    /// Every clip failed.
    #[error("No clips produced: {message}")]
    NoClipsProduced { message: String, transient: bool },

    #[error("Upstream service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Scoring failed: {0}")]
    ScoringFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job cancelled: {0}")]
    Cancelled(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] clipgen_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Self::InvalidSource(msg.into())
    }

    pub fn insufficient_resources(msg: impl Into<String>) -> Self {
        Self::InsufficientResources(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn transcription_failed(msg: impl Into<String>) -> Self {
        Self::TranscriptionFailed(msg.into())
    }

    pub fn scoring_failed(msg: impl Into<String>) -> Self {
        Self::ScoringFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn no_clips(message: impl Into<String>, transient: bool) -> Self {
        Self::NoClipsProduced {
            message: message.into(),
            transient,
        }
    }

    /// Map this error onto the retry taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkerError::InvalidRequest(_)
            | WorkerError::InvalidSource(_)
            | WorkerError::InsufficientResources(_)
            | WorkerError::ConfigError(_)
            | WorkerError::Cancelled(_)
            | WorkerError::Json(_) => ErrorClass::Fatal,

            WorkerError::NoClipsProduced { transient, .. } => {
                if *transient {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }

            WorkerError::ServiceUnavailable(_) => ErrorClass::Transient,

            WorkerError::TranscriptionFailed(_) | WorkerError::ScoringFailed(_) => {
                ErrorClass::Degradable
            }

            WorkerError::Media(MediaError::Timeout(_)) => ErrorClass::Transient,
            WorkerError::Media(_) => ErrorClass::Fatal,

            WorkerError::Queue(e) => {
                if e.is_retryable() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }

            WorkerError::Storage(_) => ErrorClass::Degradable,

            WorkerError::Io(_) => ErrorClass::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
