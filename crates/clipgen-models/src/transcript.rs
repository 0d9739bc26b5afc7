//! Word-level transcript types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single transcribed word with absolute timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl TranscriptWord {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end: end.max(start),
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Copy of this word moved later by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            text: self.text.clone(),
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// Full transcript: plain text plus ordered words.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Transcript {
    pub text: String,
    pub words: Vec<TranscriptWord>,
}

impl Transcript {
    pub fn new(text: impl Into<String>, words: Vec<TranscriptWord>) -> Self {
        Self {
            text: text.into(),
            words,
        }
    }

    /// True when no text was recognized.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.words.is_empty()
    }

    /// Append another window's transcript, shifting its words by `offset`.
    pub fn append_shifted(&mut self, other: Transcript, offset: f64) {
        let text = other.text.trim();
        if !text.is_empty() {
            if !self.text.is_empty() {
                self.text.push(' ');
            }
            self.text.push_str(text);
        }
        self.words
            .extend(other.words.iter().map(|w| w.shifted(offset)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_shifted_offsets_words() {
        let mut full = Transcript::default();
        full.append_shifted(
            Transcript::new("hello world", vec![
                TranscriptWord::new("hello", 0.0, 0.4),
                TranscriptWord::new("world", 0.5, 0.9),
            ]),
            0.0,
        );
        full.append_shifted(
            Transcript::new(" again ", vec![TranscriptWord::new("again", 1.0, 1.5)]),
            900.0,
        );

        assert_eq!(full.text, "hello world again");
        assert_eq!(full.words.len(), 3);
        assert_eq!(full.words[2].start, 901.0);
        assert_eq!(full.words[2].end, 901.5);
        assert!(full.words.windows(2).all(|pair| pair[0].start <= pair[1].start));
    }

    #[test]
    fn test_empty_transcript() {
        assert!(Transcript::default().is_empty());
        assert!(Transcript::new("   ", vec![]).is_empty());
        assert!(!Transcript::new("hi", vec![]).is_empty());
    }

    #[test]
    fn test_word_end_never_precedes_start() {
        let w = TranscriptWord::new("x", 2.0, 1.0);
        assert_eq!(w.end, 2.0);
        assert_eq!(w.duration(), 0.0);
    }
}
