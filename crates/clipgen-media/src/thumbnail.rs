//! Thumbnail generation.

use clipgen_models::render_config::{THUMBNAIL_SCALE_WIDTH, THUMBNAIL_TIMESTAMP};
use std::path::Path;
use std::time::Duration;

use crate::command::{FfmpegCommand, Transcoder};
use crate::error::{MediaError, MediaResult};
use crate::filters::filter_thumbnail;

/// Build the single-frame thumbnail command.
pub fn thumbnail_command(video_path: &Path, output_path: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .input_arg("-ss")
        .input_arg(THUMBNAIL_TIMESTAMP)
        .single_frame()
        .video_filter(filter_thumbnail(THUMBNAIL_SCALE_WIDTH))
        .log_level("error")
}

/// Generate a JPEG thumbnail from a video file.
pub async fn generate_thumbnail(
    transcoder: &dyn Transcoder,
    video_path: &Path,
    output_path: &Path,
    timeout: Duration,
) -> MediaResult<u64> {
    let output = transcoder
        .run(&thumbnail_command(video_path, output_path), timeout)
        .await?;

    if !output.output_exists || output.output_bytes == 0 {
        return Err(MediaError::ffmpeg_failed(
            "Thumbnail generation produced no output",
            Some(output.stderr_tail),
            output.exit_code,
        ));
    }
    Ok(output.output_bytes)
}
