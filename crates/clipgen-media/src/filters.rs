//! FFmpeg video filter definitions.

use clipgen_models::{AspectRatio, RenderConfig};
use std::path::Path;

/// Scale to fit inside the target frame, then letterbox to its exact size.
///
/// On CUDA the scale runs on the device and frames are downloaded before
/// padding, since `pad` and `subtitles` are CPU filters.
pub fn scale_pad_filter(aspect: AspectRatio, config: &RenderConfig) -> String {
    let (w, h) = aspect.dimensions();
    let scale = format!(
        "{}={w}:{h}:force_original_aspect_ratio=decrease",
        config.scale_filter_name
    );
    let pad = format!("pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1");

    if config.is_accelerated() {
        format!("{scale},hwdownload,format=nv12,{pad}")
    } else {
        format!("{scale},{pad}")
    }
}

/// Escape a path for use as a filter option value.
pub fn escape_filter_path(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let mut escaped = String::with_capacity(normalized.len() + 12);
    for ch in normalized.chars() {
        match ch {
            ':' => escaped.push_str("\\:"),
            '\'' => escaped.push_str("\\'"),
            ',' => escaped.push_str("\\,"),
            ';' => escaped.push_str("\\;"),
            '[' => escaped.push_str("\\["),
            ']' => escaped.push_str("\\]"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Burn in an ASS subtitle file.
pub fn subtitles_filter(path: &Path) -> String {
    format!("subtitles={}", escape_filter_path(path))
}

/// Full `-vf` chain for one clip.
pub fn build_render_filter(
    aspect: AspectRatio,
    config: &RenderConfig,
    subtitles: Option<&Path>,
) -> String {
    let mut filter = scale_pad_filter(aspect, config);
    if let Some(path) = subtitles {
        filter.push(',');
        filter.push_str(&subtitles_filter(path));
    }
    filter
}

/// Build filter for thumbnail generation.
pub fn filter_thumbnail(width: u32) -> String {
    format!("scale={}:-2", width)
}
