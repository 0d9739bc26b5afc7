//! FFmpeg CLI wrapper for clip production.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a transcoder boundary
//! - Source probing and audio extraction
//! - Hardware capability probing
//! - Karaoke caption synthesis (ASS)
//! - Per-moment clip rendering
//! - Thumbnail generation and filesystem pre-flight checks

pub mod audio;
pub mod captions;
pub mod command;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod hardware;
pub mod probe;
pub mod progress;
pub mod render;
pub mod thumbnail;

pub use audio::{AudioWindow, DEFAULT_MAX_AUDIO_SECS, DEFAULT_WINDOW_SECS};
pub use captions::{build_caption_track, render_ass, write_ass_file};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner, TranscodeOutput, Transcoder};
pub use error::{MediaError, MediaResult};
pub use hardware::{derive_render_config, detect_render_config, HardwareFacts};
pub use probe::{probe_media, FfmpegMediaProber, MediaInfo, MediaProber};
pub use progress::FfmpegProgress;
pub use render::{ClipRenderer, RenderFlags, RenderRequest, MIN_OUTPUT_BYTES};
pub use thumbnail::generate_thumbnail;
