//! Karaoke caption synthesis.
//!
//! Transcript words inside a moment are rebased to the moment start,
//! grouped into short phrases and written as an ASS document where every
//! word carries a `\k` tag with its own duration in centiseconds.

use clipgen_models::{AspectRatio, CaptionTrack, CaptionWord, Moment, PhraseGroup, TranscriptWord};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::MediaResult;

/// Above this many words, phrases shrink to keep the screen readable.
pub const DENSE_WORD_THRESHOLD: usize = 20;
pub const DENSE_GROUP_SIZE: usize = 3;
pub const DEFAULT_GROUP_SIZE: usize = 4;

const STYLE_NAME: &str = "Karaoke";

/// Build the caption track for one moment.
///
/// Returns `None` when no word starts inside the moment window.
pub fn build_caption_track(moment: &Moment, words: &[TranscriptWord]) -> Option<CaptionTrack> {
    let window_start = moment.start;
    let window_end = moment.end();

    let rebased: Vec<CaptionWord> = words
        .iter()
        .filter(|w| w.start >= window_start && w.start <= window_end)
        .filter_map(|w| {
            let text = clean_word(&w.text);
            if text.is_empty() {
                return None;
            }
            let start = w.start - window_start;
            let end = (w.end.min(window_end) - window_start).max(start);
            Some(CaptionWord { text, start, end })
        })
        .collect();

    if rebased.is_empty() {
        return None;
    }

    let group_size = if rebased.len() > DENSE_WORD_THRESHOLD {
        DENSE_GROUP_SIZE
    } else {
        DEFAULT_GROUP_SIZE
    };

    let groups = rebased
        .chunks(group_size)
        .map(|chunk| PhraseGroup {
            words: chunk.to_vec(),
        })
        .collect();

    Some(CaptionTrack { groups })
}

/// Strip characters that would be read as ASS override blocks or breaks.
fn clean_word(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '{' | '}' | '\\'))
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Format seconds as an ASS timestamp `H:MM:SS.cc`.
pub fn ass_timestamp(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let cs = total_cs % 100;
    let total_secs = total_cs / 100;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    format!("{hours}:{mins:02}:{secs:02}.{cs:02}")
}

fn ass_header(aspect: AspectRatio) -> String {
    let (w, h) = aspect.dimensions();
    let font_size = (h as f64 * 0.045).round() as u32;
    let margin_v = h / 8;

    // Unsung words use SecondaryColour (white); sung words switch to
    // PrimaryColour (yellow).
    format!(
        "[Script Info]\n\
         ScriptType: v4.00+\n\
         PlayResX: {w}\n\
         PlayResY: {h}\n\
         WrapStyle: 2\n\
         ScaledBorderAndShadow: yes\n\
         \n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
         Style: {STYLE_NAME},Arial,{font_size},&H0000FFFF,&H00FFFFFF,&H00000000,&H64000000,-1,0,0,0,100,100,0,0,1,4,1,2,60,60,{margin_v},1\n\
         \n\
         [Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n"
    )
}

/// Render a caption track as an ASS document sized for `aspect`.
pub fn render_ass(track: &CaptionTrack, aspect: AspectRatio) -> String {
    let mut doc = ass_header(aspect);

    for group in &track.groups {
        let text = group
            .words
            .iter()
            .map(|w| format!("{{\\k{}}}{}", w.duration_cs(), w.text))
            .collect::<Vec<_>>()
            .join(" ");

        let _ = writeln!(
            doc,
            "Dialogue: 0,{},{},{STYLE_NAME},,0,0,0,,{}",
            ass_timestamp(group.start()),
            ass_timestamp(group.end()),
            text
        );
    }

    doc
}

/// Write the track to a temporary `.ass` file in `dir`.
///
/// The file is deleted when the returned handle is dropped.
pub fn write_ass_file(track: &CaptionTrack, aspect: AspectRatio, dir: &Path) -> MediaResult<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("captions_")
        .suffix(".ass")
        .tempfile_in(dir)?;
    file.write_all(render_ass(track, aspect).as_bytes())?;
    file.flush()?;
    Ok(file)
}
