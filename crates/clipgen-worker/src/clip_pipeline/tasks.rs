use std::path::{Path, PathBuf};

use clipgen_media::build_caption_track;
use clipgen_models::{CaptionTrack, Moment, Transcript};

/// One clip waiting to be rendered.
#[derive(Debug, Clone)]
pub struct ClipTask {
    pub moment: Moment,
    /// Where the renderer writes the clip
    pub output: PathBuf,
    /// Caption track for this moment, when captions apply
    pub captions: Option<CaptionTrack>,
}

/// Generate render tasks from selected moments.
///
/// Caption tracks are built only when captions are enabled and a transcript
/// exists; moments without speech get no track.
pub fn generate_clip_tasks(
    moments: &[Moment],
    transcript: Option<&Transcript>,
    captions_enabled: bool,
    clips_dir: &Path,
) -> Vec<ClipTask> {
    moments
        .iter()
        .map(|moment| {
            let captions = match (captions_enabled, transcript) {
                (true, Some(t)) => build_caption_track(moment, &t.words),
                _ => None,
            };
            ClipTask {
                moment: moment.clone(),
                output: clips_dir.join(format!("{}.mp4", moment.clip_name())),
                captions,
            }
        })
        .collect()
}
