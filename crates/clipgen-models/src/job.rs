//! Job definitions and the persisted job lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ClipGeneration,
    Thumbnail,
    ContentRepurpose,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ClipGeneration => "clip-generation",
            JobKind::Thumbnail => "thumbnail",
            JobKind::ContentRepurpose => "content-repurpose",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = ParseJobFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clip-generation" => Ok(JobKind::ClipGeneration),
            "thumbnail" => Ok(JobKind::Thumbnail),
            "content-repurpose" => Ok(JobKind::ContentRepurpose),
            other => Err(ParseJobFieldError::Kind(other.to_string())),
        }
    }
}

/// Lifecycle status of a job.
///
/// `Retrying` is transient and always returns to `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Retrying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle edge.
    ///
    /// Rewriting the current status is always allowed so that at-least-once
    /// writes can be replayed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if *self == next {
            return true;
        }
        match (self, next) {
            (Pending, InProgress) => true,
            (InProgress, Retrying) => true,
            (Retrying, InProgress) => true,
            (InProgress, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseJobFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "RETRYING" => Ok(JobStatus::Retrying),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(ParseJobFieldError::Status(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseJobFieldError {
    #[error("Unknown job kind: {0}")]
    Kind(String),
    #[error("Unknown job status: {0}")]
    Status(String),
}

/// Progress percentage plus a human-readable phase description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct JobProgress {
    pub percent: u8,
    pub description: String,
}

impl JobProgress {
    pub fn new(percent: u8, description: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            description: description.into(),
        }
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub owner_id: String,
    pub kind: JobKind,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub progress: JobProgress,

    /// Set only while `status == Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Set only while `status == Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Current attempt, starting at 1.
    #[serde(default = "first_attempt")]
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn first_attempt() -> u32 {
    1
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: JobId, owner_id: impl Into<String>, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: owner_id.into(),
            kind,
            status: JobStatus::Pending,
            progress: JobProgress::new(0, "Queued"),
            result: None,
            error: None,
            attempt: first_attempt(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a partial update.
    ///
    /// Fields absent from the update are left untouched. `result` and
    /// `error` are cleared whenever the status no longer permits them.
    /// Returns whether anything other than `updated_at` changed.
    pub fn apply(&mut self, update: &JobUpdate) -> bool {
        let before = (
            self.status,
            self.progress.clone(),
            self.result.clone(),
            self.error.clone(),
            self.attempt,
        );

        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = &update.progress {
            self.progress = progress.clone();
        }
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(attempt) = update.attempt {
            self.attempt = attempt;
        }

        if self.status != JobStatus::Completed {
            self.result = None;
        }
        if self.status != JobStatus::Failed {
            self.error = None;
        }
        self.updated_at = Utc::now();

        before
            != (
                self.status,
                self.progress.clone(),
                self.result.clone(),
                self.error.clone(),
                self.attempt,
            )
    }
}

/// Partial update to a persisted job. Unset fields are not written.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(status: JobStatus) -> Self {
        Self::new().with_status(status)
    }

    pub fn progress(percent: u8, description: impl Into<String>) -> Self {
        Self::new().with_progress(percent, description)
    }

    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(JobProgress::new(100, "Completed")),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, percent: u8, description: impl Into<String>) -> Self {
        self.progress = Some(JobProgress::new(percent, description));
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new(JobId::from_string("job-1"), "owner-1", JobKind::ClipGeneration)
    }

    #[test]
    fn test_job_creation() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.progress.percent, 0);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_status_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Retrying.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Retrying.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(InProgress));
    }

    #[test]
    fn test_progress_update_is_idempotent() {
        let mut job = job();
        job.apply(&JobUpdate::status(JobStatus::InProgress));

        let update = JobUpdate::progress(30, "Transcribing");
        assert!(job.apply(&update));
        let snapshot = job.clone();
        assert!(!job.apply(&update));

        assert_eq!(job.progress, snapshot.progress);
        assert_eq!(job.status, snapshot.status);
        assert!(job.updated_at >= snapshot.updated_at);
    }

    #[test]
    fn test_progress_update_does_not_clobber_result() {
        let mut job = job();
        job.apply(&JobUpdate::status(JobStatus::InProgress));
        job.apply(&JobUpdate::completed(json!({"total_clips": 2})));

        job.apply(&JobUpdate::progress(100, "Done"));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"total_clips": 2})));
    }

    #[test]
    fn test_result_and_error_follow_status() {
        let mut job = job();
        job.apply(&JobUpdate::failed("boom"));
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());

        let mut job = self::job();
        job.apply(&JobUpdate::status(JobStatus::InProgress));
        job.apply(&JobUpdate::completed(json!({})));
        assert!(job.result.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_status_serde_format() {
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert_eq!(
            serde_json::to_string(&JobKind::ClipGeneration).unwrap(),
            "\"clip-generation\""
        );
        assert_eq!("RETRYING".parse::<JobStatus>(), Ok(JobStatus::Retrying));
        assert!("retrying".parse::<JobStatus>().is_err());
    }
}
