//! Caption track types. All times are relative to the owning moment.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl CaptionWord {
    /// Display duration in centiseconds, as used by karaoke tags.
    pub fn duration_cs(&self) -> u32 {
        ((self.end - self.start).max(0.0) * 100.0).round() as u32
    }
}

/// Words shown on screen together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseGroup {
    pub words: Vec<CaptionWord>,
}

impl PhraseGroup {
    pub fn start(&self) -> f64 {
        self.words.first().map(|w| w.start).unwrap_or(0.0)
    }

    pub fn end(&self) -> f64 {
        self.words.last().map(|w| w.end).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptionTrack {
    pub groups: Vec<PhraseGroup>,
}

impl CaptionTrack {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.groups.iter().map(|g| g.words.len()).sum()
    }
}
