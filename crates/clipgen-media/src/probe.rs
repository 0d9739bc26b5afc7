//! FFprobe media information and the prober boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::audio::{self, AudioWindow};
use crate::command::{FfmpegRunner, Transcoder};
use crate::error::{MediaError, MediaResult};

/// Source media information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Container format (e.g., "mov,mp4,m4a,3gp,3g2,mj2")
    pub format_name: String,
    pub has_video: bool,
    pub has_audio: bool,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// File size in bytes
    pub size: u64,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
}

/// Probe a media file with ffprobe, bounded by `timeout`.
///
/// Every failure here means the source is unusable.
pub async fn probe_media(path: impl AsRef<Path>, timeout: Duration) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let mut command = Command::new("ffprobe");
    command
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| MediaError::Timeout(timeout.as_secs()))??;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Parse ffprobe JSON into `MediaInfo`, rejecting sources without video
/// or with a non-positive duration.
pub fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .unwrap_or(0.0);
    if duration <= 0.0 {
        return Err(MediaError::invalid_video("Source has no measurable duration"));
    }

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(MediaInfo {
        duration,
        format_name: probe.format.format_name.clone().unwrap_or_default(),
        has_video: true,
        has_audio,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        size,
    })
}

/// Source inspection and audio preparation used by the pipeline.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Validate the container and read its duration.
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;

    /// Write a mono speech-rate audio track capped at `max_duration` seconds.
    async fn extract_audio(&self, input: &Path, output: &Path, max_duration: f64) -> MediaResult<()>;

    /// Cut audio into fixed windows for transcription.
    async fn split_audio(
        &self,
        audio: &Path,
        dir: &Path,
        window_secs: f64,
        total_duration: f64,
    ) -> MediaResult<Vec<AudioWindow>>;
}

/// `MediaProber` backed by ffprobe and ffmpeg.
#[derive(Clone)]
pub struct FfmpegMediaProber {
    transcoder: Arc<dyn Transcoder>,
    probe_timeout: Duration,
    transcode_timeout: Duration,
}

impl FfmpegMediaProber {
    pub fn new(probe_timeout: Duration, transcode_timeout: Duration) -> Self {
        Self {
            transcoder: Arc::new(FfmpegRunner::new()),
            probe_timeout,
            transcode_timeout,
        }
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }
}

#[async_trait]
impl MediaProber for FfmpegMediaProber {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe_media(path, self.probe_timeout).await
    }

    async fn extract_audio(&self, input: &Path, output: &Path, max_duration: f64) -> MediaResult<()> {
        audio::extract_audio(
            self.transcoder.as_ref(),
            input,
            output,
            max_duration,
            self.transcode_timeout,
        )
        .await
    }

    async fn split_audio(
        &self,
        audio_path: &Path,
        dir: &Path,
        window_secs: f64,
        total_duration: f64,
    ) -> MediaResult<Vec<AudioWindow>> {
        audio::split_audio(
            self.transcoder.as_ref(),
            audio_path,
            dir,
            window_secs,
            total_duration,
            self.transcode_timeout,
        )
        .await
    }
}

/// Path helper for the extracted audio of a job.
pub fn audio_path_in(dir: &Path) -> PathBuf {
    dir.join("audio.mp3")
}
