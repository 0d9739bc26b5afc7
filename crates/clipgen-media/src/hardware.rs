//! Hardware capability probe.
//!
//! Runs once at startup and turns whatever the host offers into an
//! immutable [`RenderConfig`]. Probing never fails: any error yields the
//! CPU configuration.

use clipgen_models::RenderConfig;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{MediaError, MediaResult};

/// GPU memory (MiB) required for each parallelism tier.
const TIER_4_MIN_FREE_MB: u64 = 8 * 1024;
const TIER_3_MIN_FREE_MB: u64 = 4 * 1024;
const TIER_2_MIN_FREE_MB: u64 = 2 * 1024;

/// One GPU as reported by `nvidia-smi`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub name: String,
    pub memory_total_mb: u64,
    pub memory_free_mb: u64,
}

/// Raw facts gathered from the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareFacts {
    pub gpu: Option<GpuInfo>,
    pub nvenc_available: bool,
}

/// Derive the render configuration from probed facts.
pub fn derive_render_config(facts: &HardwareFacts) -> RenderConfig {
    let Some(gpu) = facts.gpu.as_ref() else {
        return RenderConfig::cpu();
    };
    if !facts.nvenc_available {
        return RenderConfig::cpu();
    }

    let max_parallel = match gpu.memory_free_mb {
        mb if mb >= TIER_4_MIN_FREE_MB => 4,
        mb if mb >= TIER_3_MIN_FREE_MB => 3,
        mb if mb >= TIER_2_MIN_FREE_MB => 2,
        _ => return RenderConfig::cpu(),
    };

    RenderConfig::cuda(max_parallel).with_device(gpu.name.clone(), gpu.memory_free_mb)
}

/// Parse the first GPU from
/// `nvidia-smi --query-gpu=name,memory.total,memory.free --format=csv,noheader,nounits`.
pub fn parse_nvidia_smi(output: &str) -> Option<GpuInfo> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split(',').map(str::trim);

    let name = fields.next()?.to_string();
    let memory_total_mb = fields.next()?.parse().ok()?;
    let memory_free_mb = fields.next()?.parse().ok()?;

    if name.is_empty() {
        return None;
    }
    Some(GpuInfo {
        name,
        memory_total_mb,
        memory_free_mb,
    })
}

/// Whether `ffmpeg -encoders` output lists NVENC H.264.
pub fn encoders_include_nvenc(output: &str) -> bool {
    output
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some("h264_nvenc"))
}

async fn run_capture(program: &str, args: &[&str], timeout: Duration) -> MediaResult<String> {
    which::which(program).map_err(|_| MediaError::internal(format!("{program} not found in PATH")))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| MediaError::Timeout(timeout.as_secs()))??;

    if !output.status.success() {
        return Err(MediaError::internal(format!(
            "{program} exited with {:?}",
            output.status.code()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Gather facts from `nvidia-smi` and `ffmpeg -encoders`.
pub async fn probe_hardware(timeout: Duration) -> MediaResult<HardwareFacts> {
    let smi = run_capture(
        "nvidia-smi",
        &[
            "--query-gpu=name,memory.total,memory.free",
            "--format=csv,noheader,nounits",
        ],
        timeout,
    )
    .await?;

    let gpu = parse_nvidia_smi(&smi)
        .ok_or_else(|| MediaError::internal("nvidia-smi reported no usable GPU"))?;

    let encoders = run_capture("ffmpeg", &["-hide_banner", "-encoders"], timeout).await?;

    Ok(HardwareFacts {
        gpu: Some(gpu),
        nvenc_available: encoders_include_nvenc(&encoders),
    })
}

/// Probe the host and build the process-wide render configuration.
pub async fn detect_render_config(timeout: Duration, force_cpu: bool) -> RenderConfig {
    if force_cpu {
        info!("CPU rendering forced by configuration");
        return RenderConfig::cpu();
    }

    let facts = match probe_hardware(timeout).await {
        Ok(facts) => facts,
        Err(e) => {
            warn!(error = %e, "Accelerator probe failed, using CPU rendering");
            return RenderConfig::cpu();
        }
    };

    let config = derive_render_config(&facts);
    info!(
        encoder = %config.encoder_name,
        max_parallel_clips = config.max_parallel_clips,
        gpu = ?facts.gpu.as_ref().map(|g| g.name.as_str()),
        free_mb = ?facts.gpu.as_ref().map(|g| g.memory_free_mb),
        nvenc = facts.nvenc_available,
        "Render configuration selected"
    );
    config
}
