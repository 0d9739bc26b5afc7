//! Clip-generation submission boundary.

use async_trait::async_trait;
use clipgen_models::{ClipGenerationRequest, JobId, JobKind, JobUpdate};
use tracing::{info, warn};
use validator::Validate;

use crate::error::{QueueError, QueueResult};
use crate::job::{ClipGenerationJob, QueueJob};
use crate::queue::JobQueue;
use crate::store::JobStore;

/// Anything that can hand a job to the workers.
#[async_trait]
pub trait JobEnqueuer: Send + Sync {
    /// Enqueue a job, returning the broker's message ID.
    async fn enqueue(&self, job: &QueueJob) -> QueueResult<String>;
}

#[async_trait]
impl JobEnqueuer for JobQueue {
    async fn enqueue(&self, job: &QueueJob) -> QueueResult<String> {
        JobQueue::enqueue(self, job).await
    }
}

/// Validate a request, persist a PENDING job and enqueue it.
///
/// Returns as soon as the job is on the queue. If enqueueing fails the job
/// record is marked FAILED so it never sits in PENDING forever.
pub async fn submit_clip_generation(
    store: &dyn JobStore,
    enqueuer: &dyn JobEnqueuer,
    request: ClipGenerationRequest,
) -> QueueResult<JobId> {
    request
        .validate()
        .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;

    let job_id = request
        .job_id
        .as_deref()
        .map(JobId::from_string)
        .unwrap_or_default();

    store
        .create(&job_id, &request.owner_id, JobKind::ClipGeneration)
        .await?;

    let job = QueueJob::ClipGeneration(ClipGenerationJob::from_request(job_id.clone(), &request));
    match enqueuer.enqueue(&job).await {
        Ok(message_id) => {
            info!(
                job_id = %job_id,
                owner_id = %request.owner_id,
                message_id = %message_id,
                "Submitted clip generation job"
            );
            Ok(job_id)
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Failed to enqueue clip generation job");
            if let Err(store_err) = store
                .update(&job_id, JobUpdate::failed(format!("Enqueue failed: {}", e)))
                .await
            {
                warn!(job_id = %job_id, error = %store_err, "Failed to mark job as failed");
            }
            Err(e)
        }
    }
}
