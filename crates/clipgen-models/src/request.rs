//! Clip-generation job submission payload.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::AspectRatio;

/// Maximum number of target platforms per request.
pub const MAX_TARGET_PLATFORMS: usize = 10;

/// Request accepted at the job submission boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ClipGenerationRequest {
    /// Caller-supplied job ID; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128))]
    pub job_id: Option<String>,

    #[validate(length(min = 1, max = 128))]
    pub owner_id: String,

    /// Local path or `file://` URL of the uploaded source
    #[validate(length(min = 1))]
    pub source_locator: String,

    #[serde(default = "default_caption_enabled")]
    pub caption_enabled: bool,

    #[serde(default)]
    pub aspect_ratio: AspectRatio,

    #[serde(default)]
    #[validate(length(max = 10))]
    pub target_platforms: Vec<String>,
}

fn default_caption_enabled() -> bool {
    true
}

impl ClipGenerationRequest {
    pub fn new(owner_id: impl Into<String>, source_locator: impl Into<String>) -> Self {
        Self {
            job_id: None,
            owner_id: owner_id.into(),
            source_locator: source_locator.into(),
            caption_enabled: default_caption_enabled(),
            aspect_ratio: AspectRatio::default(),
            target_platforms: Vec::new(),
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_captions(mut self, enabled: bool) -> Self {
        self.caption_enabled = enabled;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    /// Resolve the source locator to a local path.
    ///
    /// Returns `None` for URLs with a scheme other than `file`.
    pub fn source_path(&self) -> Option<PathBuf> {
        resolve_source_locator(&self.source_locator)
    }
}

/// Resolve a source locator (plain path or `file://` URL) to a local path.
pub fn resolve_source_locator(locator: &str) -> Option<PathBuf> {
    let locator = locator.trim();
    if locator.contains("://") {
        let url = url::Url::parse(locator).ok()?;
        if url.scheme() != "file" {
            return None;
        }
        return url.to_file_path().ok();
    }
    Some(PathBuf::from(locator))
}
