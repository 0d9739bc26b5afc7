use std::path::Path;

use anyhow::Context;
use clipgen_media::fs_utils::available_disk_mb;
use clipgen_media::{check_ffmpeg, check_ffprobe};
use clipgen_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    for dir in [&config.work_dir, &config.output_dir, &config.cache_dir] {
        ensure_dir(dir).await?;
    }
    ensure_disk(&config.work_dir, config.min_free_disk_mb)?;

    let ffmpeg = check_ffmpeg().context("ffmpeg not available")?;
    let ffprobe = check_ffprobe().context("ffprobe not available")?;
    println!("worker-selfcheck: ffmpeg={} ffprobe={}", ffmpeg.display(), ffprobe.display());

    ensure_env_present(&["REDIS_URL"])?;
    for optional in ["WHISPER_API_KEY", "GEMINI_API_KEY"] {
        if std::env::var(optional).map_or(true, |v| v.is_empty()) {
            println!("worker-selfcheck: {} not set, feature degraded", optional);
        }
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("cannot create {}", path.display()))
}

fn ensure_disk(path: &Path, min_mb: u64) -> anyhow::Result<()> {
    let free = available_disk_mb(path).with_context(|| format!("cannot stat {}", path.display()))?;
    if free < min_mb {
        anyhow::bail!("only {} MiB free at {}, need {}", free, path.display(), min_mb);
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
