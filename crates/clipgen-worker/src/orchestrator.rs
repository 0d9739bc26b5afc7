//! Clip generation job orchestration.
//!
//! Drives one job through probe, transcript, selection and rendering,
//! persisting progress at each phase boundary. This is the only place a
//! clip generation job is marked terminal.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clipgen_media::fs_utils::{ensure_disk_headroom, ensure_memory_headroom, move_file};
use clipgen_media::probe::audio_path_in;
use clipgen_media::{MediaError, MediaProber, RenderFlags};
use clipgen_models::{ClipGenerationResult, ClipOutcome, JobId, JobKind, JobStatus, JobUpdate};
use clipgen_queue::{ClipGenerationJob, JobStore, QueueError};
use tracing::{debug, info, warn, Instrument};

use crate::clip_pipeline::{generate_clip_tasks, RenderProgress, RenderScheduler};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::moments::MomentSelector;
use crate::retry::RetryDecision;
use crate::transcript::TranscriptAcquirer;

/// Progress reached when moment selection starts; rendering fills the next 55.
const RENDER_PROGRESS_BASE: u8 = 40;
const RENDER_PROGRESS_SPAN: usize = 55;

/// Runs clip generation jobs end to end.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    prober: Arc<dyn MediaProber>,
    transcripts: TranscriptAcquirer,
    selector: MomentSelector,
    scheduler: RenderScheduler,
    config: WorkerConfig,
}

/// Writes per-clip render progress to the job store.
struct StoreProgress<'a> {
    store: &'a dyn JobStore,
    job_id: &'a JobId,
    logger: &'a JobLogger,
}

#[async_trait]
impl RenderProgress for StoreProgress<'_> {
    async fn clip_finished(&self, done: usize, total: usize) {
        let percent = RENDER_PROGRESS_BASE + (RENDER_PROGRESS_SPAN * done / total.max(1)) as u8;
        let message = format!("Rendered {}/{} clips", done, total);
        self.logger.log_progress(percent, &message);
        if let Err(e) = self
            .store
            .update(self.job_id, JobUpdate::progress(percent, message))
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "Failed to persist render progress");
        }
    }
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        prober: Arc<dyn MediaProber>,
        transcripts: TranscriptAcquirer,
        selector: MomentSelector,
        scheduler: RenderScheduler,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            prober,
            transcripts,
            selector,
            scheduler,
            config,
        }
    }

    /// Run a job to a terminal status and return that status.
    ///
    /// Jobs that are already terminal (redelivered messages) are left alone.
    pub async fn run(&self, job: &ClipGenerationJob) -> WorkerResult<JobStatus> {
        let logger = JobLogger::for_kind(&job.job_id, JobKind::ClipGeneration);
        self.run_inner(job, &logger)
            .instrument(logger.create_span())
            .await
    }

    async fn run_inner(&self, job: &ClipGenerationJob, logger: &JobLogger) -> WorkerResult<JobStatus> {
        let id = &job.job_id;
        let record = self
            .store
            .read(id)
            .await?
            .ok_or_else(|| WorkerError::invalid_request(format!("Job {} has no record", id)))?;

        if record.is_terminal() {
            info!(job_id = %id, status = %record.status, "Job already finished, skipping");
            return Ok(record.status);
        }

        let policy = self.config.retry_policy();
        let mut attempt = record.attempt.max(1);

        if let Err(e) = self
            .write(
                id,
                JobUpdate::status(JobStatus::InProgress)
                    .with_attempt(attempt)
                    .with_progress(0, "Starting"),
            )
            .await
        {
            return self.stopped(id, e, logger).await;
        }

        loop {
            logger.log_start(attempt);

            let error = match self.attempt(job, attempt, logger).await {
                Ok(result) => {
                    return match self.complete(id, &result, logger).await {
                        Err(e) => self.stopped(id, e, logger).await,
                        done => done,
                    }
                }
                Err(e) => e,
            };
            if matches!(error, WorkerError::Cancelled(_)) {
                return self.stopped(id, error, logger).await;
            }

            if !error.is_transient() {
                return self.fail(id, &error, logger).await;
            }

            let delay = match policy.decide(attempt) {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::GiveUp => {
                    logger.log_warning(&format!("Giving up after {} attempts", attempt));
                    return self.fail(id, &error, logger).await;
                }
            };

            logger.log_warning(&format!(
                "Attempt {} failed ({}), retrying in {:?}",
                attempt, error, delay
            ));
            if let Err(e) = self
                .guarded_write(id, JobUpdate::status(JobStatus::Retrying))
                .await
            {
                return self.stopped(id, e, logger).await;
            }
            metrics::record_job_retry(JobKind::ClipGeneration);

            tokio::time::sleep(delay).await;

            attempt += 1;
            if let Err(e) = self
                .guarded_write(
                    id,
                    JobUpdate::status(JobStatus::InProgress).with_attempt(attempt),
                )
                .await
            {
                return self.stopped(id, e, logger).await;
            }
        }
    }

    /// Settle a run that ended on `error` outside the normal failure path.
    ///
    /// Cancellations report whatever status the record now holds; anything
    /// else is propagated.
    async fn stopped(&self, id: &JobId, error: WorkerError, logger: &JobLogger) -> WorkerResult<JobStatus> {
        let WorkerError::Cancelled(reason) = error else {
            return Err(error);
        };
        logger.log_warning(&format!("Stopped: {}", reason));
        Ok(self
            .store
            .read(id)
            .await?
            .map_or(JobStatus::Failed, |job| job.status))
    }

    /// One pass through the pipeline inside its own scratch directory.
    async fn attempt(
        &self,
        job: &ClipGenerationJob,
        attempt: u32,
        logger: &JobLogger,
    ) -> WorkerResult<ClipGenerationResult> {
        let id = &job.job_id;
        let request = job.to_request();

        self.checkpoint(id, 5, "Validating source", logger).await?;
        let source = request.source_path().ok_or_else(|| {
            WorkerError::invalid_source(format!(
                "Unsupported source locator: {}",
                request.source_locator
            ))
        })?;
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(WorkerError::invalid_source(format!(
                "Source not found: {}",
                source.display()
            )));
        }

        let info = self
            .prober
            .probe(&source)
            .await
            .map_err(|e| WorkerError::invalid_source(format!("Probe failed: {}", e)))?;
        if !info.has_video {
            return Err(WorkerError::invalid_source("Source has no video stream"));
        }
        if info.duration <= 0.0 {
            return Err(WorkerError::invalid_source("Source has no duration"));
        }

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", id, attempt))
            .tempdir_in(&self.config.work_dir)?;
        debug!(job_id = %id, dir = %scratch.path().display(), "Created scratch directory");

        let transcript = if !info.has_audio {
            logger.log_warning("Source has no audio track, skipping transcript");
            None
        } else if !self.transcripts.is_available() {
            logger.log_warning("No transcriber configured, skipping transcript");
            None
        } else {
            self.checkpoint(id, 15, "Extracting audio", logger).await?;
            self.check_disk()?;

            let audio = audio_path_in(scratch.path());
            let audio_secs = info.duration.min(self.config.max_audio_secs);
            self.prober
                .extract_audio(&source, &audio, audio_secs)
                .await
                .map_err(|e| match e {
                    MediaError::Timeout(_) => WorkerError::Media(e),
                    other => WorkerError::invalid_source(format!("Audio extraction failed: {}", other)),
                })?;

            self.checkpoint(id, 30, "Transcribing", logger).await?;
            self.transcripts.acquire(&audio, audio_secs, scratch.path()).await
        };

        self.checkpoint(id, RENDER_PROGRESS_BASE, "Selecting moments", logger)
            .await?;
        let selection = self.selector.select(info.duration, transcript.as_ref()).await;
        if selection.moments.is_empty() {
            return Err(WorkerError::no_clips("No moments selected", false));
        }

        self.check_disk()?;
        ensure_memory_headroom(self.config.min_free_memory_mb)
            .map_err(|e| WorkerError::insufficient_resources(e.to_string()))?;
        self.ensure_not_cancelled(id).await?;

        let clips_dir = scratch.path().join("clips");
        tokio::fs::create_dir_all(&clips_dir).await?;
        let tasks = generate_clip_tasks(
            &selection.moments,
            transcript.as_ref(),
            request.caption_enabled,
            &clips_dir,
        );
        let flags = RenderFlags {
            aspect_ratio: request.aspect_ratio,
            captions_enabled: request.caption_enabled,
        };
        let progress = StoreProgress {
            store: self.store.as_ref(),
            job_id: id,
            logger,
        };

        let outcomes = self
            .scheduler
            .render_all(&source, &tasks, flags, scratch.path(), &progress)
            .await;

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        if succeeded == 0 {
            let transient = outcomes.iter().any(ClipOutcome::is_transient_failure);
            let first_error = outcomes
                .iter()
                .find_map(|o| o.error_message.as_deref())
                .unwrap_or("unknown error");
            return Err(WorkerError::no_clips(
                format!("All {} clips failed; first error: {}", outcomes.len(), first_error),
                transient,
            ));
        }
        if succeeded < outcomes.len() {
            logger.log_warning(&format!(
                "{} of {} clips failed",
                outcomes.len() - succeeded,
                outcomes.len()
            ));
        }

        self.ensure_not_cancelled(id).await?;
        let outcomes = self.publish(id, outcomes).await?;

        Ok(ClipGenerationResult::from_outcomes(
            &outcomes,
            info.duration,
            selection.method,
        ))
    }

    /// Move successful clips out of the scratch directory.
    async fn publish(&self, id: &JobId, outcomes: Vec<ClipOutcome>) -> WorkerResult<Vec<ClipOutcome>> {
        let job_dir = self.job_output_dir(id);
        tokio::fs::create_dir_all(&job_dir).await?;

        let mut published = Vec::with_capacity(outcomes.len());
        for mut outcome in outcomes {
            if let Some(locator) = outcome.output_locator.take() {
                let from = PathBuf::from(&locator);
                let to = match from.file_name() {
                    Some(name) => job_dir.join(name),
                    None => job_dir.join(format!("clip_{:02}.mp4", outcome.moment_index + 1)),
                };
                move_file(&from, &to).await?;
                outcome.output_locator = Some(to.to_string_lossy().into_owned());
            }
            published.push(outcome);
        }
        Ok(published)
    }

    pub fn job_output_dir(&self, id: &JobId) -> PathBuf {
        self.config.output_dir.join(id.as_str())
    }

    async fn complete(
        &self,
        id: &JobId,
        result: &ClipGenerationResult,
        logger: &JobLogger,
    ) -> WorkerResult<JobStatus> {
        let value = serde_json::to_value(result)?;
        self.guarded_write(id, JobUpdate::completed(value)).await?;
        metrics::record_job_completed(JobKind::ClipGeneration);
        logger.log_completion(&format!(
            "{} clips ({} failed), selection {}",
            result.total_clips, result.failed_clips, result.selection_method
        ));
        Ok(JobStatus::Completed)
    }

    /// Mark the job FAILED unless something else already finished it.
    async fn fail(&self, id: &JobId, error: &WorkerError, logger: &JobLogger) -> WorkerResult<JobStatus> {
        logger.log_error(&error.to_string());

        if let Some(job) = self.store.read(id).await? {
            if job.is_terminal() {
                debug!(job_id = %id, status = %job.status, "Job already terminal, keeping its record");
                return Ok(job.status);
            }
        }

        if let Err(e) = self.write(id, JobUpdate::failed(error.to_string())).await {
            return self.stopped(id, e, logger).await;
        }
        metrics::record_job_failed(JobKind::ClipGeneration);
        Ok(JobStatus::Failed)
    }

    /// Write an update, treating a rejection by the store as cancellation.
    async fn write(&self, id: &JobId, update: JobUpdate) -> WorkerResult<()> {
        match self.store.update(id, update).await {
            Ok(_) => Ok(()),
            Err(QueueError::RejectedUpdate { status, .. }) => Err(WorkerError::cancelled(format!(
                "job is already {}",
                status
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-read the job before writing so an external cancellation wins.
    async fn guarded_write(&self, id: &JobId, update: JobUpdate) -> WorkerResult<()> {
        self.ensure_not_cancelled(id).await?;
        self.write(id, update).await
    }

    /// Stop if the job was failed from outside, otherwise persist progress.
    async fn checkpoint(&self, id: &JobId, percent: u8, message: &str, logger: &JobLogger) -> WorkerResult<()> {
        self.guarded_write(id, JobUpdate::progress(percent, message))
            .await?;
        logger.log_progress(percent, message);
        Ok(())
    }

    async fn ensure_not_cancelled(&self, id: &JobId) -> WorkerResult<()> {
        match self.store.read(id).await? {
            Some(job) if job.status == JobStatus::Failed => Err(WorkerError::cancelled(
                job.error.unwrap_or_else(|| "failed externally".to_string()),
            )),
            Some(_) => Ok(()),
            None => Err(WorkerError::cancelled("job record removed")),
        }
    }

    fn check_disk(&self) -> WorkerResult<()> {
        ensure_disk_headroom(&self.config.work_dir, self.config.min_free_disk_mb)
            .map_err(|e| WorkerError::insufficient_resources(e.to_string()))
    }
}

