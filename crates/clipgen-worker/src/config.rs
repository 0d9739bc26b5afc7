//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Parent directory for per-attempt scratch directories
    pub work_dir: PathBuf,
    /// Final clip destination, one subdirectory per job
    pub output_dir: PathBuf,
    /// Root of the local transcript cache
    pub cache_dir: PathBuf,
    /// Per-invocation FFmpeg timeout
    pub transcode_timeout: Duration,
    pub probe_timeout: Duration,
    /// Hardware probe timeout (nvidia-smi, encoder listing)
    pub hardware_probe_timeout: Duration,
    /// Audio beyond this many seconds is not transcribed
    pub max_audio_secs: f64,
    pub transcribe_window_secs: f64,
    /// Per-window transcription timeout
    pub transcribe_timeout: Duration,
    /// Per-chunk scoring timeout
    pub scoring_timeout: Duration,
    pub scoring_retries: u32,
    /// Upper bound on moments per job
    pub max_clips: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub min_free_disk_mb: u64,
    pub min_free_memory_mb: u64,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Skip GPU detection and render on CPU
    pub force_cpu: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: PathBuf::from("/tmp/clipgen"),
            output_dir: PathBuf::from("/tmp/clipgen/output"),
            cache_dir: PathBuf::from("/tmp/clipgen/cache"),
            transcode_timeout: Duration::from_secs(1800),
            probe_timeout: Duration::from_secs(60),
            hardware_probe_timeout: Duration::from_secs(10),
            max_audio_secs: 3600.0,
            transcribe_window_secs: 900.0,
            transcribe_timeout: Duration::from_secs(300),
            scoring_timeout: Duration::from_secs(30),
            scoring_retries: 2,
            max_clips: 5,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(120),
            min_free_disk_mb: 2048,
            min_free_memory_mb: 512,
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            force_cpu: false,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(name, default.as_secs()))
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_concurrent_jobs: env_or("WORKER_MAX_JOBS", d.max_concurrent_jobs).max(1),
            work_dir: env_or("WORKER_WORK_DIR", d.work_dir),
            output_dir: env_or("WORKER_OUTPUT_DIR", d.output_dir),
            cache_dir: env_or("WORKER_CACHE_DIR", d.cache_dir),
            transcode_timeout: env_secs("WORKER_TRANSCODE_TIMEOUT", d.transcode_timeout),
            probe_timeout: env_secs("WORKER_PROBE_TIMEOUT", d.probe_timeout),
            hardware_probe_timeout: d.hardware_probe_timeout,
            max_audio_secs: env_or("WORKER_MAX_AUDIO_SECS", d.max_audio_secs),
            transcribe_window_secs: env_or("WORKER_TRANSCRIBE_WINDOW_SECS", d.transcribe_window_secs),
            transcribe_timeout: env_secs("WORKER_TRANSCRIBE_TIMEOUT", d.transcribe_timeout),
            scoring_timeout: env_secs("WORKER_SCORING_TIMEOUT", d.scoring_timeout),
            scoring_retries: env_or("WORKER_SCORING_RETRIES", d.scoring_retries),
            max_clips: env_or("WORKER_MAX_CLIPS", d.max_clips).max(1),
            max_retries: env_or("WORKER_MAX_RETRIES", d.max_retries),
            retry_base_delay: env_secs("WORKER_RETRY_BASE_SECS", d.retry_base_delay),
            retry_max_delay: d.retry_max_delay,
            min_free_disk_mb: env_or("WORKER_MIN_FREE_DISK_MB", d.min_free_disk_mb),
            min_free_memory_mb: env_or("WORKER_MIN_FREE_MEMORY_MB", d.min_free_memory_mb),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", d.shutdown_timeout),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", d.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", d.claim_min_idle),
            force_cpu: env_flag("CLIPGEN_FORCE_CPU"),
        }
    }

    /// How often in-flight messages are re-claimed so they never reach
    /// `claim_min_idle` while a job is still running.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.claim_min_idle / 3).max(Duration::from_millis(100))
    }

    /// Job-level retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay, self.retry_max_delay)
    }
}
