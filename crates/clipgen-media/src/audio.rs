//! Audio extraction and windowing for transcription.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::command::{FfmpegCommand, Transcoder};
use crate::error::{MediaError, MediaResult};

/// Sample rate expected by speech recognition services.
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;
/// Bitrate of extracted speech audio.
pub const AUDIO_BITRATE: &str = "64k";
/// Default cap on extracted audio, in seconds.
pub const DEFAULT_MAX_AUDIO_SECS: f64 = 3600.0;
/// Default transcription window, in seconds.
pub const DEFAULT_WINDOW_SECS: f64 = 900.0;

/// Windows shorter than this are not worth transcribing.
const MIN_WINDOW_SECS: f64 = 0.5;

/// One slice of the extracted audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioWindow {
    pub path: PathBuf,
    /// Start of this window within the full audio, in seconds
    pub offset: f64,
    pub duration: f64,
}

/// Build the mono 16 kHz MP3 extraction command.
pub fn extract_audio_command(input: &Path, output: &Path, max_duration: f64) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .duration(max_duration)
        .no_video()
        .output_args(["-ac", "1", "-ar"])
        .output_arg(AUDIO_SAMPLE_RATE.to_string())
        .audio_codec("libmp3lame")
        .audio_bitrate(AUDIO_BITRATE)
}

/// Extract the audio track, bounded to `max_duration` seconds.
pub async fn extract_audio(
    transcoder: &dyn Transcoder,
    input: &Path,
    output: &Path,
    max_duration: f64,
    timeout: Duration,
) -> MediaResult<()> {
    let cmd = extract_audio_command(input, output, max_duration);
    let result = transcoder.run(&cmd, timeout).await?;

    if !result.output_exists || result.output_bytes == 0 {
        return Err(MediaError::ffmpeg_failed(
            "Audio extraction produced no output",
            Some(result.stderr_tail),
            result.exit_code,
        ));
    }

    debug!(
        output = %output.display(),
        bytes = result.output_bytes,
        "Extracted audio"
    );
    Ok(())
}

/// Plan `(offset, duration)` windows covering `total` seconds.
pub fn plan_windows(total: f64, window: f64) -> Vec<(f64, f64)> {
    if total <= 0.0 {
        return Vec::new();
    }
    if window <= 0.0 || total <= window {
        return vec![(0.0, total)];
    }

    let mut windows = Vec::new();
    let mut offset = 0.0;
    while offset < total {
        let len = window.min(total - offset);
        if len >= MIN_WINDOW_SECS || windows.is_empty() {
            windows.push((offset, len));
        }
        offset += window;
    }
    windows
}

/// Split audio into windows with stream copy.
///
/// Audio that fits in one window is returned as-is without running ffmpeg.
pub async fn split_audio(
    transcoder: &dyn Transcoder,
    audio: &Path,
    dir: &Path,
    window_secs: f64,
    total_duration: f64,
    timeout: Duration,
) -> MediaResult<Vec<AudioWindow>> {
    let plan = plan_windows(total_duration, window_secs);
    if plan.len() <= 1 {
        return Ok(plan
            .into_iter()
            .map(|(offset, duration)| AudioWindow {
                path: audio.to_path_buf(),
                offset,
                duration,
            })
            .collect());
    }

    let extension = audio
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3");

    let mut windows = Vec::with_capacity(plan.len());
    for (i, (offset, duration)) in plan.into_iter().enumerate() {
        let path = dir.join(format!("window_{:03}.{}", i, extension));
        let cmd = FfmpegCommand::new(audio, &path)
            .seek(offset)
            .duration(duration)
            .output_args(["-c", "copy"]);
        transcoder.run(&cmd, timeout).await?;

        windows.push(AudioWindow {
            path,
            offset,
            duration,
        });
    }

    debug!(count = windows.len(), "Split audio into transcription windows");
    Ok(windows)
}
