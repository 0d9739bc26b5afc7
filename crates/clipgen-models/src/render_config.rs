//! Hardware-derived render configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CPU video codec (H.264)
pub const CPU_VIDEO_CODEC: &str = "libx264";
/// NVENC video codec
pub const NVENC_VIDEO_CODEC: &str = "h264_nvenc";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Default CRF for CPU encodes (CQ for NVENC)
pub const DEFAULT_CRF: u8 = 23;

/// Thumbnail generation settings
pub const THUMBNAIL_SCALE_WIDTH: u32 = 480;
pub const THUMBNAIL_TIMESTAMP: &str = "00:00:01";

/// Acceleration backend used for encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Accelerator {
    #[default]
    Cpu,
    Cuda,
}

/// Immutable render parameters computed once per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenderConfig {
    pub accelerator: Accelerator,

    /// Video encoder (e.g., "libx264", "h264_nvenc")
    pub encoder_name: String,

    /// Encoder tuning arguments placed after `-c:v`
    pub encoder_args: Vec<String>,

    /// Input-side arguments placed before `-i`
    pub decoder_args: Vec<String>,

    /// Scale filter ("scale" or "scale_cuda")
    pub scale_filter_name: String,

    pub max_parallel_clips: usize,
    pub supports_parallel: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_memory_mb: Option<u64>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::cpu()
    }
}

impl RenderConfig {
    /// CPU-only configuration: libx264, one clip at a time.
    pub fn cpu() -> Self {
        Self {
            accelerator: Accelerator::Cpu,
            encoder_name: CPU_VIDEO_CODEC.to_string(),
            encoder_args: vec![
                "-preset".to_string(),
                "veryfast".to_string(),
                "-crf".to_string(),
                DEFAULT_CRF.to_string(),
            ],
            decoder_args: Vec::new(),
            scale_filter_name: "scale".to_string(),
            max_parallel_clips: 1,
            supports_parallel: false,
            device_name: None,
            device_memory_mb: None,
        }
    }

    /// NVENC configuration with CUDA decode and scaling.
    pub fn cuda(max_parallel_clips: usize) -> Self {
        let max_parallel_clips = max_parallel_clips.max(1);
        Self {
            accelerator: Accelerator::Cuda,
            encoder_name: NVENC_VIDEO_CODEC.to_string(),
            // NVENC uses -cq instead of -crf
            encoder_args: vec![
                "-preset".to_string(),
                "p4".to_string(),
                "-rc".to_string(),
                "vbr".to_string(),
                "-cq".to_string(),
                DEFAULT_CRF.to_string(),
            ],
            decoder_args: vec![
                "-hwaccel".to_string(),
                "cuda".to_string(),
                "-hwaccel_output_format".to_string(),
                "cuda".to_string(),
            ],
            scale_filter_name: "scale_cuda".to_string(),
            max_parallel_clips,
            supports_parallel: max_parallel_clips > 1,
            device_name: None,
            device_memory_mb: None,
        }
    }

    pub fn with_device(mut self, name: impl Into<String>, memory_mb: u64) -> Self {
        self.device_name = Some(name.into());
        self.device_memory_mb = Some(memory_mb);
        self
    }

    /// Override parallelism, e.g. to force sequential rendering.
    pub fn with_max_parallel(mut self, max_parallel_clips: usize) -> Self {
        self.max_parallel_clips = max_parallel_clips.max(1);
        self.supports_parallel = self.max_parallel_clips > 1;
        self
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerator == Accelerator::Cuda
    }

    /// Concurrent renders allowed for `moment_count` moments.
    pub fn parallelism_for(&self, moment_count: usize) -> usize {
        if !self.supports_parallel {
            return 1;
        }
        self.max_parallel_clips.min(moment_count).max(1)
    }

    /// Output-side encoder arguments, audio included.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.encoder_name.clone()];
        args.extend(self.encoder_args.iter().cloned());
        args.extend_from_slice(&[
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            DEFAULT_AUDIO_CODEC.to_string(),
            "-b:a".to_string(),
            DEFAULT_AUDIO_BITRATE.to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]);
        args
    }
}
