//! End-to-end pipeline scenarios with fake media, transcription and scoring.
//!
//! Nothing here needs FFmpeg, network access or Redis.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clipgen_media::{
    AudioWindow, ClipRenderer, FfmpegCommand, MediaError, MediaInfo, MediaProber, MediaResult,
    TranscodeOutput, Transcoder,
};
use clipgen_models::{
    ClipGenerationRequest, ClipGenerationResult, Job, JobId, JobKind, JobStatus, JobUpdate,
    MomentSource, RenderConfig, Transcript, TranscriptWord,
};
use clipgen_queue::{
    submit_clip_generation, ClipGenerationJob, ContentRepurposeJob, JobEnqueuer, JobStore,
    MemoryJobStore, QueueJob, QueueResult, ThumbnailJob,
};
use clipgen_storage::{LocalCacheBackend, TranscriptCache};
use clipgen_worker::handlers::REPURPOSE_REJECTION;
use clipgen_worker::{
    JobHandlers, JobOrchestrator, MomentScorer, MomentSelector, RenderScheduler, ThumbnailHandler,
    TranscriptAcquirer, TranscriptionService, WorkerConfig, WorkerError, WorkerResult,
};
use tempfile::TempDir;

const CLIP_BYTES: usize = 20 * 1024;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeProber {
    duration: f64,
    has_audio: bool,
}

impl FakeProber {
    fn new(duration: f64) -> Arc<Self> {
        Arc::new(Self {
            duration,
            has_audio: true,
        })
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        Ok(MediaInfo {
            duration: self.duration,
            format_name: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            has_video: true,
            has_audio: self.has_audio,
            width: 1920,
            height: 1080,
            size: 1024,
        })
    }

    async fn extract_audio(&self, _input: &Path, output: &Path, _max_duration: f64) -> MediaResult<()> {
        tokio::fs::write(output, b"fake-audio-bytes").await?;
        Ok(())
    }

    async fn split_audio(
        &self,
        audio: &Path,
        dir: &Path,
        _window_secs: f64,
        total_duration: f64,
    ) -> MediaResult<Vec<AudioWindow>> {
        let path = dir.join("window_000.mp3");
        tokio::fs::copy(audio, &path).await?;
        Ok(vec![AudioWindow {
            path,
            offset: 0.0,
            duration: total_duration,
        }])
    }
}

#[derive(Clone, Copy)]
enum Render {
    Ok,
    Fail,
    Timeout,
    GpuOom,
}

/// Decides each render from the call number and the output file name.
struct FakeTranscoder {
    calls: AtomicUsize,
    script: Box<dyn Fn(usize, &str) -> Render + Send + Sync>,
}

impl FakeTranscoder {
    fn new(script: impl Fn(usize, &str) -> Render + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Box::new(script),
        })
    }

    fn always_ok() -> Arc<Self> {
        Self::new(|_, _| Render::Ok)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<TranscodeOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let name = cmd
            .output()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        finish((self.script)(call, &name), cmd, timeout).await
    }
}

async fn finish(render: Render, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<TranscodeOutput> {
    match render {
        Render::Timeout => Err(MediaError::Timeout(timeout.as_secs())),
        Render::Fail => Ok(TranscodeOutput {
            exit_code: Some(1),
            success: false,
            stderr_tail: "Conversion failed!".to_string(),
            ..Default::default()
        }),
        Render::GpuOom => Ok(TranscodeOutput {
            exit_code: Some(1),
            success: false,
            stderr_tail: "[h264_nvenc] CUDA_ERROR_OUT_OF_MEMORY: out of memory\nConversion failed!"
                .to_string(),
            ..Default::default()
        }),
        Render::Ok => {
            tokio::fs::write(cmd.output(), vec![0u8; CLIP_BYTES]).await?;
            Ok(TranscodeOutput {
                exit_code: Some(0),
                success: true,
                output_exists: true,
                output_bytes: CLIP_BYTES as u64,
                ..Default::default()
            })
        }
    }
}

/// Marks the job FAILED from "outside" during the first render, which then
/// ends as `first`. Later renders succeed.
struct CancellingTranscoder {
    store: Arc<MemoryJobStore>,
    job_id: JobId,
    first: Render,
    calls: AtomicUsize,
}

impl CancellingTranscoder {
    fn new(h: &Harness, job_id: &JobId, first: Render) -> Arc<Self> {
        Arc::new(Self {
            store: h.store.clone(),
            job_id: job_id.clone(),
            first,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for CancellingTranscoder {
    async fn transcode(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<TranscodeOutput> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return finish(Render::Ok, cmd, timeout).await;
        }
        self.store
            .update(&self.job_id, JobUpdate::failed("cancelled by owner"))
            .await
            .ok();
        finish(self.first, cmd, timeout).await
    }
}

/// One word every `step` seconds between `from` and `to`.
struct FakeTranscriber {
    calls: AtomicUsize,
    from: f64,
    to: f64,
    step: f64,
}

impl FakeTranscriber {
    fn new(from: f64, to: f64, step: f64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            from,
            to,
            step,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionService for FakeTranscriber {
    async fn transcribe(&self, _audio: Vec<u8>, _file_name: &str) -> WorkerResult<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut words = Vec::new();
        let mut t = self.from;
        let mut i = 0usize;
        while t < self.to {
            let text = if i % 50 == 7 { "wow" } else { "word" };
            words.push(TranscriptWord::new(text, t, t + self.step * 0.8));
            t += self.step;
            i += 1;
        }
        let text = words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        Ok(Transcript::new(text, words))
    }
}

struct UnavailableTranscriber;

#[async_trait]
impl TranscriptionService for UnavailableTranscriber {
    async fn transcribe(&self, _audio: Vec<u8>, _file_name: &str) -> WorkerResult<Transcript> {
        Err(WorkerError::service_unavailable("503 from transcription API"))
    }
}

struct KeywordScorer;

#[async_trait]
impl MomentScorer for KeywordScorer {
    async fn score(&self, text: &str) -> WorkerResult<f64> {
        Ok(if text.contains("wow") { 8.0 } else { 2.0 })
    }
}

#[derive(Default)]
struct RecordingEnqueuer {
    jobs: Mutex<Vec<QueueJob>>,
}

#[async_trait]
impl JobEnqueuer for RecordingEnqueuer {
    async fn enqueue(&self, job: &QueueJob) -> QueueResult<String> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job.clone());
        Ok(format!("{}-0", jobs.len()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    root: TempDir,
    source: PathBuf,
    config: WorkerConfig,
    store: Arc<MemoryJobStore>,
}

struct Parts {
    prober: Arc<dyn MediaProber>,
    transcoder: Arc<dyn Transcoder>,
    transcriber: Option<Arc<dyn TranscriptionService>>,
    scorer: Option<Arc<dyn MomentScorer>>,
    render_config: RenderConfig,
}

impl Parts {
    fn new(prober: Arc<dyn MediaProber>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            prober,
            transcoder,
            transcriber: None,
            scorer: None,
            render_config: RenderConfig::cpu(),
        }
    }

    fn transcriber(mut self, t: Arc<dyn TranscriptionService>) -> Self {
        self.transcriber = Some(t);
        self
    }

    fn scorer(mut self, s: Arc<dyn MomentScorer>) -> Self {
        self.scorer = Some(s);
        self
    }

    fn render_config(mut self, c: RenderConfig) -> Self {
        self.render_config = c;
        self
    }
}

impl Harness {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let source = root.path().join("source.mp4");
        std::fs::write(&source, b"not really a video").unwrap();

        let config = WorkerConfig {
            work_dir: root.path().join("work"),
            output_dir: root.path().join("out"),
            cache_dir: root.path().join("cache"),
            min_free_disk_mb: 0,
            min_free_memory_mb: 0,
            retry_base_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(50),
            ..WorkerConfig::default()
        };

        Self {
            root,
            source,
            config,
            store: Arc::new(MemoryJobStore::new()),
        }
    }

    fn dyn_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    fn orchestrator(&self, parts: Parts) -> JobOrchestrator {
        let mut transcripts = TranscriptAcquirer::new(parts.transcriber.clone(), Arc::clone(&parts.prober))
            .with_windows(self.config.transcribe_window_secs, Duration::from_secs(5));
        if parts.transcriber.is_some() {
            transcripts = transcripts.with_cache(TranscriptCache::new(Arc::new(LocalCacheBackend::new(
                self.config.cache_dir.clone(),
            ))));
        }

        JobOrchestrator::new(
            self.dyn_store(),
            parts.prober,
            transcripts,
            MomentSelector::new(parts.scorer)
                .with_max_clips(self.config.max_clips)
                .with_scoring(Duration::from_secs(1), 0),
            RenderScheduler::new(ClipRenderer::new(parts.transcoder), Arc::new(parts.render_config)),
            self.config.clone(),
        )
    }

    async fn new_job(&self) -> ClipGenerationJob {
        let id = JobId::new();
        self.store
            .create(&id, "owner-1", JobKind::ClipGeneration)
            .await
            .unwrap();
        ClipGenerationJob::new(id, "owner-1", self.source.to_string_lossy())
    }

    async fn job(&self, id: &JobId) -> Job {
        self.store.read(id).await.unwrap().unwrap()
    }

    async fn result(&self, id: &JobId) -> ClipGenerationResult {
        let job = self.job(id).await;
        serde_json::from_value(job.result.expect("completed job has a result")).unwrap()
    }
}

fn count(history: &[JobStatus], status: JobStatus) -> usize {
    history.iter().filter(|s| **s == status).count()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn short_source_without_transcriber_uses_fallback() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(42.0), FakeTranscoder::always_ok()));
    let job = h.new_job().await;
    assert!(job.caption_enabled);

    let status = orchestrator.run(&job).await.unwrap();
    assert_eq!(status, JobStatus::Completed);

    let result = h.result(&job.job_id).await;
    assert_eq!(result.total_clips, 1);
    assert!(!result.captions_added);
    assert_eq!(result.selection_method, MomentSource::Fallback);
    assert!((result.clips[0].duration - 16.8).abs() < 1e-9);
    assert!((result.video_duration - 42.0).abs() < 1e-9);

    let clip = PathBuf::from(&result.clips[0].output_locator);
    assert_eq!(clip, h.config.output_dir.join(job.job_id.as_str()).join("clip_01.mp4"));
    assert!(clip.exists());

    let record = h.job(&job.job_id).await;
    assert_eq!(record.progress.percent, 100);
    assert!(record.error.is_none());
    assert_eq!(
        h.store.status_history(&job.job_id).await,
        vec![JobStatus::Pending, JobStatus::InProgress, JobStatus::Completed]
    );
}

#[tokio::test]
async fn one_failed_clip_is_partial_success() {
    let h = Harness::new();
    let transcoder = FakeTranscoder::new(|_, name| {
        if name == "clip_02.mp4" {
            Render::Fail
        } else {
            Render::Ok
        }
    });
    // 200 s gives three moments
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(200.0), transcoder.clone()));
    let job = h.new_job().await;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Completed);
    assert_eq!(transcoder.calls(), 3);

    let result = h.result(&job.job_id).await;
    assert_eq!(result.total_clips, 2);
    assert_eq!(result.failed_clips, 1);
    let indices: Vec<usize> = result.clips.iter().map(|c| c.moment_index).collect();
    assert_eq!(indices, vec![0, 2]);
}

#[tokio::test]
async fn all_clips_failing_fails_the_job() {
    let h = Harness::new();
    let transcoder = FakeTranscoder::new(|_, _| Render::Fail);
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(200.0), transcoder.clone()));
    let job = h.new_job().await;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Failed);
    assert_eq!(transcoder.calls(), 3);

    let record = h.job(&job.job_id).await;
    assert!(record.result.is_none());
    let error = record.error.unwrap();
    assert!(error.contains("All 3 clips failed"), "{}", error);

    // Non-transient failures are not retried
    let history = h.store.status_history(&job.job_id).await;
    assert_eq!(count(&history, JobStatus::Retrying), 0);
    assert_eq!(history.last(), Some(&JobStatus::Failed));
}

#[tokio::test]
async fn timeout_then_success_retries_once() {
    let h = Harness::new();
    let transcoder = FakeTranscoder::new(|call, _| if call == 0 { Render::Timeout } else { Render::Ok });
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(42.0), transcoder.clone()));
    let job = h.new_job().await;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Completed);
    assert_eq!(transcoder.calls(), 2);

    let history = h.store.status_history(&job.job_id).await;
    assert_eq!(count(&history, JobStatus::Retrying), 1);
    assert_eq!(
        history,
        vec![
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Retrying,
            JobStatus::InProgress,
            JobStatus::Completed,
        ]
    );
    assert_eq!(h.job(&job.job_id).await.attempt, 2);
}

#[tokio::test]
async fn persistent_timeouts_exhaust_retries() {
    let mut h = Harness::new();
    h.config.max_retries = 2;
    let transcoder = FakeTranscoder::new(|_, _| Render::Timeout);
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(42.0), transcoder.clone()));
    let job = h.new_job().await;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Failed);
    assert_eq!(transcoder.calls(), 3);

    let history = h.store.status_history(&job.job_id).await;
    assert_eq!(count(&history, JobStatus::Retrying), 2);
    assert_eq!(history.last(), Some(&JobStatus::Failed));
    assert_eq!(h.job(&job.job_id).await.attempt, 3);
}

#[tokio::test]
async fn transcript_cache_hit_skips_transcription() {
    let h = Harness::new();
    let transcriber = FakeTranscriber::new(13.0, 25.0, 0.5);
    let orchestrator = h.orchestrator(
        Parts::new(FakeProber::new(42.0), FakeTranscoder::always_ok()).transcriber(transcriber.clone()),
    );

    let first = h.new_job().await;
    assert_eq!(orchestrator.run(&first).await.unwrap(), JobStatus::Completed);
    assert_eq!(transcriber.calls(), 1);

    let second = h.new_job().await;
    assert_eq!(orchestrator.run(&second).await.unwrap(), JobStatus::Completed);
    assert_eq!(transcriber.calls(), 1);

    // Both runs captioned from the same transcript
    let a = h.result(&first.job_id).await;
    let b = h.result(&second.job_id).await;
    assert!(a.captions_added);
    assert!(b.captions_added);
    assert_eq!(a.clips[0].byte_size, b.clips[0].byte_size);
}

#[tokio::test]
async fn captions_disabled_renders_without_subtitles() {
    let h = Harness::new();
    let transcriber = FakeTranscriber::new(13.0, 25.0, 0.5);
    let orchestrator = h.orchestrator(
        Parts::new(FakeProber::new(42.0), FakeTranscoder::always_ok()).transcriber(transcriber),
    );
    let mut job = h.new_job().await;
    job.caption_enabled = false;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Completed);
    assert!(!h.result(&job.job_id).await.captions_added);
}

#[tokio::test]
async fn unavailable_transcriber_degrades_to_fallback() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(
        Parts::new(FakeProber::new(42.0), FakeTranscoder::always_ok())
            .transcriber(Arc::new(UnavailableTranscriber))
            .scorer(Arc::new(KeywordScorer)),
    );
    let job = h.new_job().await;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Completed);
    let result = h.result(&job.job_id).await;
    assert_eq!(result.selection_method, MomentSource::Fallback);
    assert!(!result.captions_added);
    assert_eq!(result.total_clips, 1);
    assert_eq!(result.clips.len(), 1);
    assert!((result.clips[0].duration - 16.8).abs() < 1e-9);

    // Degradation is not a retry
    let history = h.store.status_history(&job.job_id).await;
    assert_eq!(count(&history, JobStatus::Retrying), 0);
}

#[tokio::test]
async fn scored_selection_on_gpu_renders_in_parallel() {
    let h = Harness::new();
    let transcriber = FakeTranscriber::new(0.0, 200.0, 1.0);
    let orchestrator = h.orchestrator(
        Parts::new(FakeProber::new(200.0), FakeTranscoder::always_ok())
            .transcriber(transcriber)
            .scorer(Arc::new(KeywordScorer))
            .render_config(RenderConfig::cuda(3)),
    );
    let job = h.new_job().await;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Completed);
    let result = h.result(&job.job_id).await;
    assert_eq!(result.selection_method, MomentSource::Scored);
    assert_eq!(result.total_clips, 3);

    let indices: Vec<usize> = result.clips.iter().map(|c| c.moment_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    for clip in &result.clips {
        assert!((clip.duration - 60.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn missing_source_fails_without_retry() {
    let h = Harness::new();
    let transcoder = FakeTranscoder::always_ok();
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(42.0), transcoder.clone()));
    let mut job = h.new_job().await;
    job.source_locator = h.root.path().join("missing.mp4").to_string_lossy().into_owned();

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Failed);
    assert_eq!(transcoder.calls(), 0);

    let record = h.job(&job.job_id).await;
    assert!(record.error.unwrap().contains("Source not found"));
    assert_eq!(
        count(&h.store.status_history(&job.job_id).await, JobStatus::Retrying),
        0
    );
}

#[tokio::test]
async fn external_cancellation_is_not_overwritten() {
    let h = Harness::new();
    let job = h.new_job().await;
    let transcoder = CancellingTranscoder::new(&h, &job.job_id, Render::Ok);
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(42.0), transcoder));

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Failed);

    let record = h.job(&job.job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("cancelled by owner"));
    assert!(record.result.is_none());
}

#[tokio::test]
async fn cancellation_during_timed_out_attempt_stays_failed() {
    let h = Harness::new();
    let job = h.new_job().await;
    let transcoder = CancellingTranscoder::new(&h, &job.job_id, Render::Timeout);
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(42.0), transcoder.clone()));

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Failed);
    assert_eq!(transcoder.calls(), 1);

    let record = h.job(&job.job_id).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("cancelled by owner"));
    assert!(record.result.is_none());
    assert_eq!(
        h.store.status_history(&job.job_id).await,
        vec![JobStatus::Pending, JobStatus::InProgress, JobStatus::Failed]
    );
}

#[tokio::test]
async fn gpu_out_of_memory_is_retried() {
    let h = Harness::new();
    let transcoder = FakeTranscoder::new(|call, _| if call == 0 { Render::GpuOom } else { Render::Ok });
    let orchestrator = h.orchestrator(
        Parts::new(FakeProber::new(42.0), transcoder.clone()).render_config(RenderConfig::cuda(2)),
    );
    let job = h.new_job().await;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Completed);
    assert_eq!(transcoder.calls(), 2);
    assert_eq!(
        count(&h.store.status_history(&job.job_id).await, JobStatus::Retrying),
        1
    );
}

#[tokio::test]
async fn finished_jobs_are_not_rerun() {
    let h = Harness::new();
    let transcoder = FakeTranscoder::always_ok();
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(42.0), transcoder.clone()));
    let job = h.new_job().await;

    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Completed);
    assert_eq!(orchestrator.run(&job).await.unwrap(), JobStatus::Completed);
    assert_eq!(transcoder.calls(), 1);
}

#[tokio::test]
async fn repeated_progress_update_is_idempotent() {
    let store = MemoryJobStore::new();
    let id = JobId::from_string("progress-job");
    store.create(&id, "owner-1", JobKind::ClipGeneration).await.unwrap();
    store
        .update(&id, JobUpdate::status(JobStatus::InProgress))
        .await
        .unwrap();

    let first = store.update(&id, JobUpdate::progress(40, "Selecting moments")).await.unwrap();
    let second = store.update(&id, JobUpdate::progress(40, "Selecting moments")).await.unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.progress, second.progress);
    assert_eq!(first.attempt, second.attempt);
    assert_eq!(first.result, second.result);
    assert_eq!(first.error, second.error);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(
        store.status_history(&id).await,
        vec![JobStatus::Pending, JobStatus::InProgress]
    );
}

// ---------------------------------------------------------------------------
// Submission and dispatch
// ---------------------------------------------------------------------------

fn handlers(h: &Harness, transcoder: Arc<dyn Transcoder>) -> JobHandlers {
    let orchestrator = h.orchestrator(Parts::new(FakeProber::new(42.0), Arc::clone(&transcoder)));
    let thumbnails = ThumbnailHandler::new(
        h.dyn_store(),
        transcoder,
        h.config.output_dir.clone(),
        Duration::from_secs(5),
    );
    JobHandlers::new(h.dyn_store(), orchestrator, thumbnails)
}

#[tokio::test]
async fn submitted_job_runs_through_dispatch() {
    let h = Harness::new();
    let enqueuer = RecordingEnqueuer::default();
    let request = ClipGenerationRequest::new("owner-1", format!("file://{}", h.source.display()))
        .with_job_id("submitted-1");

    let id = submit_clip_generation(h.store.as_ref(), &enqueuer, request)
        .await
        .unwrap();
    assert_eq!(id.as_str(), "submitted-1");

    let record = h.job(&id).await;
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.progress.percent, 0);

    let queued = enqueuer.jobs.lock().unwrap().pop().unwrap();
    assert_eq!(queued.kind(), JobKind::ClipGeneration);

    let status = handlers(&h, FakeTranscoder::always_ok())
        .handle(&queued)
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(h.result(&id).await.total_clips, 1);
}

#[tokio::test]
async fn dispatch_runs_on_spawned_task() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(
        Parts::new(FakeProber::new(200.0), FakeTranscoder::always_ok())
            .transcriber(FakeTranscriber::new(0.0, 200.0, 1.0))
            .scorer(Arc::new(KeywordScorer))
            .render_config(RenderConfig::cuda(3)),
    );
    let thumbnails = ThumbnailHandler::new(
        h.dyn_store(),
        FakeTranscoder::always_ok(),
        h.config.output_dir.clone(),
        Duration::from_secs(5),
    );
    let handlers = Arc::new(JobHandlers::new(h.dyn_store(), orchestrator, thumbnails));
    let job = QueueJob::ClipGeneration(h.new_job().await);
    let id = job.job_id().clone();

    // Scoring and parallel rendering both fan out inside the spawned future
    let task = tokio::spawn({
        let handlers = Arc::clone(&handlers);
        async move { handlers.handle(&job).await }
    });

    assert_eq!(task.await.unwrap().unwrap(), JobStatus::Completed);
    let result = h.result(&id).await;
    assert_eq!(result.selection_method, MomentSource::Scored);
    assert_eq!(result.total_clips, 3);
}

#[tokio::test]
async fn thumbnail_job_completes() {
    let h = Harness::new();
    let id = JobId::from_string("thumb-1");
    h.store.create(&id, "owner-1", JobKind::Thumbnail).await.unwrap();
    let job = QueueJob::Thumbnail(ThumbnailJob::new(id.clone(), "owner-1", h.source.to_string_lossy()));

    let status = handlers(&h, FakeTranscoder::always_ok()).handle(&job).await.unwrap();
    assert_eq!(status, JobStatus::Completed);

    let record = h.job(&id).await;
    let result = record.result.unwrap();
    assert_eq!(result["byte_size"], CLIP_BYTES as u64);
    assert!(result["thumbnail_locator"]
        .as_str()
        .unwrap()
        .ends_with("thumb-1/thumbnail.jpg"));
}

#[tokio::test]
async fn content_repurpose_job_is_rejected() {
    let h = Harness::new();
    let id = JobId::from_string("repurpose-1");
    let job = QueueJob::ContentRepurpose(ContentRepurposeJob {
        job_id: id.clone(),
        owner_id: "owner-1".to_string(),
        params: serde_json::json!({"platform": "tiktok"}),
        created_at: chrono::Utc::now(),
    });

    let status = handlers(&h, FakeTranscoder::always_ok()).handle(&job).await.unwrap();
    assert_eq!(status, JobStatus::Failed);

    let record = h.job(&id).await;
    assert_eq!(record.kind, JobKind::ContentRepurpose);
    assert_eq!(record.error.as_deref(), Some(REPURPOSE_REJECTION));
}
