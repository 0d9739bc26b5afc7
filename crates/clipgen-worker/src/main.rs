//! Clip generation worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipgen_media::{
    detect_render_config, ClipRenderer, FfmpegMediaProber, FfmpegRunner, MediaProber, Transcoder,
};
use clipgen_models::RenderConfig;
use clipgen_queue::{JobQueue, JobStore, QueueConfig, RedisJobStore};
use clipgen_storage::{LocalCacheBackend, TranscriptCache};
use clipgen_worker::metrics::init_metrics_from_env;
use clipgen_worker::{
    GeminiScorer, JobExecutor, JobHandlers, JobOrchestrator, MomentScorer, MomentSelector,
    RenderScheduler, ThumbnailHandler, TranscriptAcquirer, TranscriptionService, WhisperClient,
    WorkerConfig,
};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["clipgen=info", "clipgen_worker=info", "clipgen_media=info"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn build_handlers(
    config: &WorkerConfig,
    render_config: RenderConfig,
    store: Arc<dyn JobStore>,
) -> JobHandlers {
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegRunner::new());
    let prober: Arc<dyn MediaProber> = Arc::new(
        FfmpegMediaProber::new(config.probe_timeout, config.transcode_timeout)
            .with_transcoder(Arc::clone(&transcoder)),
    );

    let transcriber = WhisperClient::from_env().map(|c| Arc::new(c) as Arc<dyn TranscriptionService>);
    if transcriber.is_none() {
        warn!("WHISPER_API_KEY not set, jobs will run without transcripts unless cached");
    }
    let transcripts = TranscriptAcquirer::new(transcriber, Arc::clone(&prober))
        .with_cache(TranscriptCache::new(Arc::new(LocalCacheBackend::new(
            config.cache_dir.clone(),
        ))))
        .with_windows(config.transcribe_window_secs, config.transcribe_timeout);

    let scorer = GeminiScorer::from_env().map(|s| Arc::new(s) as Arc<dyn MomentScorer>);
    if scorer.is_none() {
        warn!("GEMINI_API_KEY not set, moments will be evenly spaced");
    }
    let selector = MomentSelector::new(scorer)
        .with_max_clips(config.max_clips)
        .with_scoring(config.scoring_timeout, config.scoring_retries);

    let scheduler = RenderScheduler::new(
        ClipRenderer::new(Arc::clone(&transcoder)).with_timeout(config.transcode_timeout),
        Arc::new(render_config),
    );

    let orchestrator = JobOrchestrator::new(
        Arc::clone(&store),
        prober,
        transcripts,
        selector,
        scheduler,
        config.clone(),
    );
    let thumbnails = ThumbnailHandler::new(
        Arc::clone(&store),
        transcoder,
        config.output_dir.clone(),
        config.probe_timeout,
    );

    JobHandlers::new(store, orchestrator, thumbnails)
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();
    init_metrics_from_env();

    info!("Starting clipgen-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let render_config = detect_render_config(config.hardware_probe_timeout, config.force_cpu).await;
    info!(
        accelerator = ?render_config.accelerator,
        encoder = %render_config.encoder_name,
        max_parallel_clips = render_config.max_parallel_clips,
        "Render configuration"
    );

    let queue_config = QueueConfig::from_env();
    let store: Arc<dyn JobStore> = match RedisJobStore::new(&queue_config.redis_url) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create job store: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match JobQueue::new(queue_config) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let handlers = build_handlers(&config, render_config, store);
    let executor = JobExecutor::new(config, queue, handlers);

    let shutdown = executor.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown.send(true);
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
