//! Clip rendering for a job.
//!
//! Moments become [`ClipTask`]s which the [`RenderScheduler`] hands to the
//! renderer, one at a time on CPU hosts and with bounded concurrency when
//! the render config allows it. Outcomes come back in moment order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use clipgen_media::{ClipRenderer, RenderFlags, RenderRequest};
use clipgen_models::{ClipOutcome, RenderConfig};
use futures::stream::{self, StreamExt};
use tracing::info;

use crate::metrics;

pub mod tasks;

pub use tasks::{generate_clip_tasks, ClipTask};

/// Notified each time a clip finishes, successfully or not.
#[async_trait]
pub trait RenderProgress: Send + Sync {
    async fn clip_finished(&self, done: usize, total: usize);
}

/// Progress sink that ignores updates.
pub struct NoProgress;

#[async_trait]
impl RenderProgress for NoProgress {
    async fn clip_finished(&self, _done: usize, _total: usize) {}
}

/// Dispatches render tasks according to the host's render config.
#[derive(Clone)]
pub struct RenderScheduler {
    renderer: ClipRenderer,
    config: Arc<RenderConfig>,
}

impl RenderScheduler {
    pub fn new(renderer: ClipRenderer, config: Arc<RenderConfig>) -> Self {
        Self { renderer, config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render every task and return one outcome per task, ordered by moment index.
    pub async fn render_all(
        &self,
        source: &Path,
        tasks: &[ClipTask],
        flags: RenderFlags,
        scratch_dir: &Path,
        progress: &dyn RenderProgress,
    ) -> Vec<ClipOutcome> {
        let total = tasks.len();
        let parallelism = self.config.parallelism_for(total);

        info!(
            clips = total,
            parallelism,
            encoder = %self.config.encoder_name,
            "Rendering clips"
        );

        let mut outcomes = Vec::with_capacity(total);

        if parallelism <= 1 {
            for task in tasks {
                let outcome = self.render_one(source, task, flags, scratch_dir).await;
                outcomes.push(outcome);
                progress.clip_finished(outcomes.len(), total).await;
            }
        } else {
            // Each render future owns its inputs so the job future stays Send
            let source = source.to_path_buf();
            let scratch_dir = scratch_dir.to_path_buf();
            let mut in_flight = stream::iter(tasks.to_vec())
                .map(|task| {
                    let scheduler = self.clone();
                    let source = source.clone();
                    let scratch_dir = scratch_dir.clone();
                    async move { scheduler.render_one(&source, &task, flags, &scratch_dir).await }
                })
                .buffer_unordered(parallelism);

            while let Some(outcome) = in_flight.next().await {
                outcomes.push(outcome);
                progress.clip_finished(outcomes.len(), total).await;
            }
        }

        outcomes.sort_by_key(|o| o.moment_index);
        outcomes
    }

    async fn render_one(
        &self,
        source: &Path,
        task: &ClipTask,
        flags: RenderFlags,
        scratch_dir: &Path,
    ) -> ClipOutcome {
        let started = std::time::Instant::now();
        let outcome = self
            .renderer
            .render(RenderRequest {
                source,
                moment: &task.moment,
                flags,
                config: &self.config,
                captions: task.captions.as_ref(),
                output: &task.output,
                scratch_dir,
            })
            .await;
        metrics::record_clip_rendered(outcome.success, started.elapsed().as_secs_f64());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipgen_media::{FfmpegCommand, MediaError, MediaResult, TranscodeOutput, Transcoder};
    use clipgen_models::{AspectRatio, ClipFailure, Moment, MomentSource};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Reports a 20 KiB output for every clip except `fail_index`, and
    /// tracks the highest number of concurrent invocations.
    struct CountingTranscoder {
        fail_index: Option<usize>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingTranscoder {
        fn new(fail_index: Option<usize>) -> Self {
            Self {
                fail_index,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transcoder for CountingTranscoder {
        async fn transcode(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<TranscodeOutput> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let name = cmd.output().to_string_lossy().to_string();
            if let Some(i) = self.fail_index {
                if name.ends_with(&format!("clip_{:02}.mp4", i + 1)) {
                    return Err(MediaError::Timeout(timeout.as_secs()));
                }
            }
            Ok(TranscodeOutput {
                exit_code: Some(0),
                success: true,
                output_exists: true,
                output_bytes: 20 * 1024,
                ..Default::default()
            })
        }
    }

    /// Later clips finish first: clip i sleeps (n - i) * 25 ms.
    struct StaggeredTranscoder {
        clips: usize,
        finished: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transcoder for StaggeredTranscoder {
        async fn transcode(&self, cmd: &FfmpegCommand, _timeout: Duration) -> MediaResult<TranscodeOutput> {
            let name = cmd.output().file_stem().unwrap().to_string_lossy().to_string();
            let index: usize = name.trim_start_matches("clip_").parse::<usize>().unwrap() - 1;
            tokio::time::sleep(Duration::from_millis(25 * (self.clips - index) as u64)).await;
            self.finished.lock().unwrap().push(index);
            Ok(TranscodeOutput {
                exit_code: Some(0),
                success: true,
                output_exists: true,
                output_bytes: 20 * 1024,
                ..Default::default()
            })
        }
    }

    struct RecordingProgress(Mutex<Vec<(usize, usize)>>);

    #[async_trait]
    impl RenderProgress for RecordingProgress {
        async fn clip_finished(&self, done: usize, total: usize) {
            self.0.lock().unwrap().push((done, total));
        }
    }

    fn tasks(dir: &Path, n: usize) -> Vec<ClipTask> {
        let moments: Vec<Moment> = (0..n)
            .map(|i| Moment::new(i, i as f64 * 30.0, 20.0, MomentSource::Fallback, "fallback"))
            .collect();
        generate_clip_tasks(&moments, None, false, dir)
    }

    fn flags() -> RenderFlags {
        RenderFlags {
            aspect_ratio: AspectRatio::Portrait,
            captions_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_cpu_renders_sequentially() {
        let dir = TempDir::new().unwrap();
        let transcoder = Arc::new(CountingTranscoder::new(None));
        let scheduler = RenderScheduler::new(
            ClipRenderer::new(transcoder.clone()),
            Arc::new(RenderConfig::cpu()),
        );
        let progress = RecordingProgress(Mutex::new(Vec::new()));

        let outcomes = scheduler
            .render_all(Path::new("/src.mp4"), &tasks(dir.path(), 3), flags(), dir.path(), &progress)
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(transcoder.peak.load(Ordering::SeqCst), 1);
        assert_eq!(*progress.0.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_parallel_render_is_bounded_and_ordered() {
        let dir = TempDir::new().unwrap();
        let transcoder = Arc::new(CountingTranscoder::new(Some(2)));
        let scheduler = RenderScheduler::new(
            ClipRenderer::new(transcoder.clone()),
            Arc::new(RenderConfig::cuda(2)),
        );

        let outcomes = scheduler
            .render_all(Path::new("/src.mp4"), &tasks(dir.path(), 5), flags(), dir.path(), &NoProgress)
            .await;

        assert!(transcoder.peak.load(Ordering::SeqCst) <= 2);
        let indices: Vec<usize> = outcomes.iter().map(|o| o.moment_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        // A failing clip does not affect its siblings
        assert_eq!(outcomes.iter().filter(|o| o.success).count(), 4);
        assert_eq!(outcomes[2].failure, Some(ClipFailure::Timeout));
    }

    #[tokio::test]
    async fn test_out_of_order_completion_is_reordered() {
        let dir = TempDir::new().unwrap();
        let transcoder = Arc::new(StaggeredTranscoder {
            clips: 4,
            finished: Mutex::new(Vec::new()),
        });
        let scheduler = RenderScheduler::new(
            ClipRenderer::new(transcoder.clone()),
            Arc::new(RenderConfig::cuda(4)),
        );
        let progress = RecordingProgress(Mutex::new(Vec::new()));

        let outcomes = scheduler
            .render_all(Path::new("/src.mp4"), &tasks(dir.path(), 4), flags(), dir.path(), &progress)
            .await;

        // Renders really finished in reverse
        assert_eq!(*transcoder.finished.lock().unwrap(), vec![3, 2, 1, 0]);

        let indices: Vec<usize> = outcomes.iter().map(|o| o.moment_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        let input: HashSet<usize> = tasks(dir.path(), 4).iter().map(|t| t.moment.index).collect();
        assert_eq!(indices.into_iter().collect::<HashSet<_>>(), input);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(
            *progress.0.lock().unwrap(),
            vec![(1, 4), (2, 4), (3, 4), (4, 4)]
        );
    }
}
