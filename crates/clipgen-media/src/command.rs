//! FFmpeg command builder and runner.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Bytes of stderr kept for diagnostics.
pub const STDERR_TAIL_BYTES: usize = 4096;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set duration (before input).
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Drop the video stream.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Structured result of one transcoder invocation.
#[derive(Debug, Clone, Default)]
pub struct TranscodeOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Last `STDERR_TAIL_BYTES` of non-progress stderr
    pub stderr_tail: String,
    pub output_exists: bool,
    pub output_bytes: u64,
    pub elapsed: Duration,
    pub last_progress: Option<FfmpegProgress>,
}

impl TranscodeOutput {
    /// Convert a non-zero exit into `MediaError::FfmpegFailed`.
    pub fn into_result(self) -> MediaResult<Self> {
        if self.success {
            return Ok(self);
        }
        Err(MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            (!self.stderr_tail.is_empty()).then(|| self.stderr_tail.clone()),
            self.exit_code,
        ))
    }
}

/// External transcoder boundary.
///
/// Implementations return `Ok` for any completed process, successful or
/// not, and reserve `Err` for spawn failures and timeouts.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<TranscodeOutput>;

    /// Run and require a zero exit status.
    async fn run(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<TranscodeOutput> {
        self.transcode(cmd, timeout).await?.into_result()
    }
}

/// Runs the `ffmpeg` binary as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: String,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegRunner {
    async fn transcode(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<TranscodeOutput> {
        let binary = which::which(&self.binary).map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let reader = tokio::spawn(collect_stderr(stderr));

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    output = %cmd.output().display(),
                    "FFmpeg timed out after {} seconds, killing process",
                    timeout.as_secs()
                );
                let _ = child.kill().await;
                reader.abort();
                return Err(MediaError::Timeout(timeout.as_secs()));
            }
        };

        let (stderr_tail, last_progress) = reader.await.unwrap_or_default();
        let (output_exists, output_bytes) = match tokio::fs::metadata(cmd.output()).await {
            Ok(meta) => (true, meta.len()),
            Err(_) => (false, 0),
        };

        if let Some(progress) = &last_progress {
            debug!(speed = progress.speed, frames = progress.frame, "FFmpeg finished");
        }

        Ok(TranscodeOutput {
            exit_code: status.code(),
            success: status.success(),
            stderr_tail,
            output_exists,
            output_bytes,
            elapsed: started.elapsed(),
            last_progress,
        })
    }
}

/// Drain stderr, splitting progress key/value lines from diagnostics.
async fn collect_stderr<R>(stderr: R) -> (String, Option<FfmpegProgress>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = String::new();
    let mut current = FfmpegProgress::default();
    let mut last_progress = None;

    while let Ok(Some(line)) = lines.next_line().await {
        if is_progress_line(&line) {
            if let Some(progress) = parse_progress_line(&line, &mut current) {
                last_progress = Some(progress);
            }
            continue;
        }
        tail.push_str(&line);
        tail.push('\n');
        if tail.len() > STDERR_TAIL_BYTES * 2 {
            tail = tail_of(&tail, STDERR_TAIL_BYTES).to_string();
        }
    }

    (tail_of(&tail, STDERR_TAIL_BYTES).to_string(), last_progress)
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail_of(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

fn is_progress_line(line: &str) -> bool {
    match line.trim().split_once('=') {
        Some((key, _)) => PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"),
        None => false,
    }
}

/// Parse a progress line from FFmpeg's -progress output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // out_time_ms is actually reported in microseconds
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    current.speed = speed;
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .duration(30.0)
            .video_filter("scale=1080:1920");

        let args = cmd.build_args();
        let i = args.iter().position(|a| a == "-i").unwrap();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(ss < i, "seek must precede the input");
        assert!(vf > i, "filters must follow the input");
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"30.000".to_string()));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_progress_parsing() {
        let mut progress = FfmpegProgress::default();

        parse_progress_line("out_time_us=5000000", &mut progress);
        assert_eq!(progress.out_time_ms, 5000);

        parse_progress_line("speed=1.5x", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        parse_progress_line("speed=N/A", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let result = parse_progress_line("progress=end", &mut progress);
        assert!(result.is_some());
        assert!(progress.is_complete);
    }

    #[test]
    fn test_progress_line_detection() {
        assert!(is_progress_line("frame=120"));
        assert!(is_progress_line("stream_0_0_q=23.0"));
        assert!(!is_progress_line("[h264 @ 0x55] error while decoding"));
        assert!(!is_progress_line("Invalid argument"));
    }

    #[tokio::test]
    async fn test_collect_stderr_keeps_diagnostics_only() {
        let input: &[u8] = b"frame=1\nbad thing happened\nprogress=continue\nspeed=2.0x\nprogress=end\n";
        let (tail, progress) = collect_stderr(input).await;
        assert_eq!(tail, "bad thing happened\n");
        let progress = progress.unwrap();
        assert!(progress.is_complete);
        assert_eq!(progress.frame, 1);
    }

    #[test]
    fn test_tail_of_respects_char_boundaries() {
        let s = "ééééé";
        let tail = tail_of(s, 3);
        assert!(tail.len() <= 4);
        assert!(tail.ends_with('é'));
        assert_eq!(tail_of("abc", 10), "abc");
    }

    #[test]
    fn test_failed_output_becomes_error() {
        let output = TranscodeOutput {
            exit_code: Some(1),
            success: false,
            stderr_tail: "boom".into(),
            ..Default::default()
        };
        match output.into_result() {
            Err(MediaError::FfmpegFailed { exit_code, stderr, .. }) => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr.as_deref(), Some("boom"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
