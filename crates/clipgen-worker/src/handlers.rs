//! Per-kind job handlers.
//!
//! [`JobHandlers`] is assembled once at startup and routes each
//! [`QueueJob`] variant to its handler with an exhaustive match.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clipgen_media::{generate_thumbnail, Transcoder};
use clipgen_models::{resolve_source_locator, JobId, JobKind, JobStatus, JobUpdate};
use clipgen_queue::{ContentRepurposeJob, JobStore, QueueError, QueueJob, ThumbnailJob};
use serde_json::json;
use tracing::{info, Instrument};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::orchestrator::JobOrchestrator;

/// Error written to content-repurpose jobs picked up by a worker.
pub const REPURPOSE_REJECTION: &str = "content-repurpose jobs are handled by the API service";

/// Extracts a preview frame and records it as the job result.
#[derive(Clone)]
pub struct ThumbnailHandler {
    store: Arc<dyn JobStore>,
    transcoder: Arc<dyn Transcoder>,
    output_dir: PathBuf,
    timeout: Duration,
}

impl ThumbnailHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        transcoder: Arc<dyn Transcoder>,
        output_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            transcoder,
            output_dir,
            timeout,
        }
    }

    pub async fn run(&self, job: &ThumbnailJob) -> WorkerResult<JobStatus> {
        match self.run_tracked(job).await {
            // Finished elsewhere (usually cancelled) while we were working
            Err(WorkerError::Queue(QueueError::RejectedUpdate { status, .. })) => {
                info!(job_id = %job.job_id, status = %status, "Thumbnail job settled elsewhere");
                Ok(status)
            }
            other => other,
        }
    }

    async fn run_tracked(&self, job: &ThumbnailJob) -> WorkerResult<JobStatus> {
        let id = &job.job_id;
        let logger = JobLogger::for_kind(id, JobKind::Thumbnail);

        match self.store.read(id).await? {
            Some(record) if record.is_terminal() => return Ok(record.status),
            Some(_) => {}
            None => {
                return Err(WorkerError::invalid_request(format!(
                    "Job {} has no record",
                    id
                )))
            }
        }

        logger.log_start(1);
        self.store
            .update(
                id,
                JobUpdate::status(JobStatus::InProgress).with_progress(5, "Generating thumbnail"),
            )
            .await?;

        match self.render(job).await {
            Ok((path, bytes)) => {
                let result = json!({
                    "thumbnail_locator": path.to_string_lossy(),
                    "byte_size": bytes,
                });
                self.store.update(id, JobUpdate::completed(result)).await?;
                metrics::record_job_completed(JobKind::Thumbnail);
                logger.log_completion(&format!("{} bytes", bytes));
                Ok(JobStatus::Completed)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                self.store.update(id, JobUpdate::failed(e.to_string())).await?;
                metrics::record_job_failed(JobKind::Thumbnail);
                Ok(JobStatus::Failed)
            }
        }
    }

    async fn render(&self, job: &ThumbnailJob) -> WorkerResult<(PathBuf, u64)> {
        let source = resolve_source_locator(&job.source_locator).ok_or_else(|| {
            WorkerError::invalid_source(format!("Unsupported source locator: {}", job.source_locator))
        })?;
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(WorkerError::invalid_source(format!(
                "Source not found: {}",
                source.display()
            )));
        }

        let dir = self.output_dir.join(job.job_id.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        let output = dir.join("thumbnail.jpg");

        let bytes = generate_thumbnail(self.transcoder.as_ref(), &source, &output, self.timeout).await?;
        Ok((output, bytes))
    }
}

/// One handler per job kind.
#[derive(Clone)]
pub struct JobHandlers {
    store: Arc<dyn JobStore>,
    clips: JobOrchestrator,
    thumbnails: ThumbnailHandler,
}

impl JobHandlers {
    pub fn new(store: Arc<dyn JobStore>, clips: JobOrchestrator, thumbnails: ThumbnailHandler) -> Self {
        Self {
            store,
            clips,
            thumbnails,
        }
    }

    /// Run a job to a terminal status.
    pub async fn handle(&self, job: &QueueJob) -> WorkerResult<JobStatus> {
        let span = JobLogger::for_kind(job.job_id(), job.kind()).create_span();
        async {
            match job {
                QueueJob::ClipGeneration(j) => self.clips.run(j).await,
                QueueJob::Thumbnail(j) => self.thumbnails.run(j).await,
                QueueJob::ContentRepurpose(j) => self.reject_repurpose(j).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn reject_repurpose(&self, job: &ContentRepurposeJob) -> WorkerResult<JobStatus> {
        let id: &JobId = &job.job_id;
        info!(job_id = %id, "Rejecting content-repurpose job");

        match self.store.read(id).await? {
            Some(record) if record.is_terminal() => return Ok(record.status),
            Some(_) => {}
            None => {
                self.store
                    .create(id, &job.owner_id, JobKind::ContentRepurpose)
                    .await?;
            }
        }
        self.store
            .update(id, JobUpdate::failed(REPURPOSE_REJECTION))
            .await?;
        metrics::record_job_failed(JobKind::ContentRepurpose);
        Ok(JobStatus::Failed)
    }
}
