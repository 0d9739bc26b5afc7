//! Clip renderer.
//!
//! One transcoder invocation per moment. Every failure is captured in the
//! returned [`ClipOutcome`] so a bad clip never aborts its siblings.

use clipgen_models::{AspectRatio, CaptionTrack, ClipFailure, ClipOutcome, Moment, RenderConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::captions::write_ass_file;
use crate::command::{FfmpegCommand, Transcoder};
use crate::error::MediaError;
use crate::filters::build_render_filter;

/// Outputs smaller than this are treated as truncated.
pub const MIN_OUTPUT_BYTES: u64 = 10 * 1024;

/// stderr fragments that mean the GPU was out of memory or encoder sessions.
const ACCELERATOR_PRESSURE_SIGNATURES: &[&str] = &[
    "out of memory",
    "cuda_error_out_of_memory",
    "openencodesessionex failed",
    "no nvenc capable devices found",
    "cannot allocate memory",
];

/// Default transcoder timeout per clip.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Per-job render flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderFlags {
    pub aspect_ratio: AspectRatio,
    pub captions_enabled: bool,
}

/// Everything needed to render one clip.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub source: &'a Path,
    pub moment: &'a Moment,
    pub flags: RenderFlags,
    pub config: &'a RenderConfig,
    pub captions: Option<&'a CaptionTrack>,
    pub output: &'a Path,
    /// Directory for the temporary subtitle file
    pub scratch_dir: &'a Path,
}

#[derive(Clone)]
pub struct ClipRenderer {
    transcoder: Arc<dyn Transcoder>,
    timeout: Duration,
}

impl ClipRenderer {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the transcoder command for a clip.
    pub fn build_command(&self, req: &RenderRequest<'_>, subtitles: Option<&Path>) -> FfmpegCommand {
        FfmpegCommand::new(req.source, req.output)
            .input_args(req.config.decoder_args.iter().cloned())
            .seek(req.moment.start)
            .duration(req.moment.duration)
            .video_filter(build_render_filter(req.flags.aspect_ratio, req.config, subtitles))
            .output_args(req.config.to_ffmpeg_args())
    }

    /// Render one clip. Never returns an error.
    pub async fn render(&self, req: RenderRequest<'_>) -> ClipOutcome {
        let moment = req.moment;

        // Dropped (and deleted) when this function returns
        let subtitle_file = match (req.flags.captions_enabled, req.captions) {
            (true, Some(track)) if !track.is_empty() => {
                match write_ass_file(track, req.flags.aspect_ratio, req.scratch_dir) {
                    Ok(file) => Some(file),
                    Err(e) => {
                        warn!(
                            moment_index = moment.index,
                            error = %e,
                            "Failed to write caption file, rendering without captions"
                        );
                        None
                    }
                }
            }
            _ => None,
        };
        let caption_applied = subtitle_file.is_some();

        let cmd = self.build_command(&req, subtitle_file.as_ref().map(|f| f.path()));

        let outcome = match self.transcoder.transcode(&cmd, self.timeout).await {
            Err(MediaError::Timeout(secs)) => ClipOutcome::failed(
                moment.index,
                ClipFailure::Timeout,
                format!("Transcoder timed out after {secs} seconds"),
                moment.duration,
            ),
            Err(e) => ClipOutcome::failed(
                moment.index,
                ClipFailure::TranscoderFailed,
                e.to_string(),
                moment.duration,
            ),
            Ok(out) if !out.success => {
                let detail = out.stderr_tail.lines().last().unwrap_or("no diagnostics").trim();
                let failure = if is_accelerator_pressure(&out.stderr_tail) {
                    ClipFailure::AcceleratorBusy
                } else {
                    ClipFailure::TranscoderFailed
                };
                ClipOutcome::failed(
                    moment.index,
                    failure,
                    format!("Transcoder exited with {:?}: {}", out.exit_code, detail),
                    moment.duration,
                )
            }
            Ok(out) if !out.output_exists => ClipOutcome::failed(
                moment.index,
                ClipFailure::OutputInvalid,
                "Transcoder reported success but produced no output",
                moment.duration,
            ),
            Ok(out) if out.output_bytes < MIN_OUTPUT_BYTES => ClipOutcome::failed(
                moment.index,
                ClipFailure::OutputInvalid,
                format!(
                    "Output is only {} bytes (minimum {})",
                    out.output_bytes, MIN_OUTPUT_BYTES
                ),
                moment.duration,
            ),
            Ok(out) => {
                if let Some(progress) = &out.last_progress {
                    debug!(
                        moment_index = moment.index,
                        encoded_pct = progress.percentage((moment.duration * 1000.0) as i64),
                        speed = progress.speed,
                        "Encode finished"
                    );
                }
                info!(
                    moment_index = moment.index,
                    bytes = out.output_bytes,
                    elapsed_ms = out.elapsed.as_millis() as u64,
                    caption_applied,
                    "Rendered clip"
                );
                ClipOutcome::succeeded(
                    moment.index,
                    req.output.to_string_lossy(),
                    out.output_bytes,
                    caption_applied,
                    moment.duration,
                )
            }
        };

        if !outcome.success {
            warn!(
                moment_index = moment.index,
                error = outcome.error_message.as_deref().unwrap_or_default(),
                "Clip render failed"
            );
            remove_partial_output(req.output).await;
        }

        outcome
    }
}

/// Whether transcoder stderr shows GPU memory or encoder-session exhaustion.
pub fn is_accelerator_pressure(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    ACCELERATOR_PRESSURE_SIGNATURES
        .iter()
        .any(|signature| stderr.contains(signature))
}

async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial clip output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial clip output"),
    }
}
