//! Job types for the queue.

use chrono::{DateTime, Utc};
use clipgen_models::{AspectRatio, ClipGenerationRequest, JobId, JobKind};
use serde::{Deserialize, Serialize};

/// Job to cut, caption and render clips from an uploaded source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipGenerationJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Owner of the job
    pub owner_id: String,
    /// Local path or `file://` URL of the source video
    pub source_locator: String,
    #[serde(default = "default_caption_enabled")]
    pub caption_enabled: bool,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub target_platforms: Vec<String>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

fn default_caption_enabled() -> bool {
    true
}

impl ClipGenerationJob {
    pub fn new(job_id: JobId, owner_id: impl Into<String>, source_locator: impl Into<String>) -> Self {
        Self {
            job_id,
            owner_id: owner_id.into(),
            source_locator: source_locator.into(),
            caption_enabled: default_caption_enabled(),
            aspect_ratio: AspectRatio::default(),
            target_platforms: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Build the queue payload for a validated submission.
    pub fn from_request(job_id: JobId, request: &ClipGenerationRequest) -> Self {
        Self {
            job_id,
            owner_id: request.owner_id.clone(),
            source_locator: request.source_locator.clone(),
            caption_enabled: request.caption_enabled,
            aspect_ratio: request.aspect_ratio,
            target_platforms: request.target_platforms.clone(),
            created_at: Utc::now(),
        }
    }

    /// Rebuild the request view used by the pipeline.
    pub fn to_request(&self) -> ClipGenerationRequest {
        ClipGenerationRequest {
            job_id: Some(self.job_id.to_string()),
            owner_id: self.owner_id.clone(),
            source_locator: self.source_locator.clone(),
            caption_enabled: self.caption_enabled,
            aspect_ratio: self.aspect_ratio,
            target_platforms: self.target_platforms.clone(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("clips:{}:{}", self.owner_id, self.job_id)
    }
}

/// Job to extract a preview thumbnail from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailJob {
    pub job_id: JobId,
    pub owner_id: String,
    pub source_locator: String,
    pub created_at: DateTime<Utc>,
}

impl ThumbnailJob {
    pub fn new(job_id: JobId, owner_id: impl Into<String>, source_locator: impl Into<String>) -> Self {
        Self {
            job_id,
            owner_id: owner_id.into(),
            source_locator: source_locator.into(),
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("thumbnail:{}:{}", self.owner_id, self.job_id)
    }
}

/// Content repurposing request. Workers reject these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRepurposeJob {
    pub job_id: JobId,
    pub owner_id: String,
    /// Opaque parameters owned by the API service
    #[serde(default)]
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ContentRepurposeJob {
    pub fn idempotency_key(&self) -> String {
        format!("repurpose:{}:{}", self.owner_id, self.job_id)
    }
}

/// Queue job envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    ClipGeneration(ClipGenerationJob),
    Thumbnail(ThumbnailJob),
    ContentRepurpose(ContentRepurposeJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::ClipGeneration(j) => &j.job_id,
            QueueJob::Thumbnail(j) => &j.job_id,
            QueueJob::ContentRepurpose(j) => &j.job_id,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            QueueJob::ClipGeneration(j) => &j.owner_id,
            QueueJob::Thumbnail(j) => &j.owner_id,
            QueueJob::ContentRepurpose(j) => &j.owner_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            QueueJob::ClipGeneration(_) => JobKind::ClipGeneration,
            QueueJob::Thumbnail(_) => JobKind::Thumbnail,
            QueueJob::ContentRepurpose(_) => JobKind::ContentRepurpose,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::ClipGeneration(j) => j.idempotency_key(),
            QueueJob::Thumbnail(j) => j.idempotency_key(),
            QueueJob::ContentRepurpose(j) => j.idempotency_key(),
        }
    }
}
