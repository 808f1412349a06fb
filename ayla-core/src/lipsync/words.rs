//! Pairs transcript text with the audio it was spoken over.
//!
//! The session delivers transcription and audio independently. A chunk that
//! carries text (its own, or the latest transcription) starts a new word; a
//! chunk without text lengthens the word being spoken.

use serde::{Deserialize, Serialize};

/// Text plus the audio duration attributed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    pub text: String,
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
pub struct WordAccumulator {
    current: Option<Word>,
    last_transcription: Option<String>,
}

impl WordAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the latest transcription until an audio chunk consumes it.
    pub fn on_transcript(&mut self, text: impl Into<String>) {
        self.last_transcription = Some(text.into());
    }

    /// Attribute one audio chunk. Returns the word this chunk completed, if any.
    pub fn on_audio(&mut self, part_text: Option<&str>, duration_ms: u64) -> Option<Word> {
        let text = match part_text.filter(|t| !t.is_empty()) {
            Some(t) => Some(t.to_owned()),
            None => self.last_transcription.take(),
        };
        let text = text.as_deref().map(str::trim).unwrap_or_default();

        if text.is_empty() {
            if let Some(word) = self.current.as_mut() {
                word.duration_ms += duration_ms;
            }
            return None;
        }

        let flushed = self.current.take();
        self.current = Some(Word {
            text: text.to_owned(),
            duration_ms,
        });
        flushed
    }

    /// Hand over the word in progress.
    pub fn flush(&mut self) -> Option<Word> {
        self.current.take()
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.last_transcription = None;
    }

    pub fn current(&self) -> Option<&Word> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, duration_ms: u64) -> Word {
        Word {
            text: text.into(),
            duration_ms,
        }
    }

    #[test]
    fn silent_chunks_extend_the_current_word() {
        let mut acc = WordAccumulator::new();
        assert_eq!(acc.on_audio(Some("salam"), 100), None);
        assert_eq!(acc.on_audio(Some(""), 50), None);
        assert_eq!(acc.on_audio(Some("necesen"), 80), Some(word("salam", 150)));
        assert_eq!(acc.flush(), Some(word("necesen", 80)));
        assert_eq!(acc.flush(), None);
    }

    #[test]
    fn latest_transcription_is_used_once() {
        let mut acc = WordAccumulator::new();
        acc.on_transcript("hello");
        assert_eq!(acc.on_audio(None, 100), None);
        assert_eq!(acc.current(), Some(&word("hello", 100)));

        // Consumed: the next chunk without text extends instead of restarting.
        assert_eq!(acc.on_audio(None, 40), None);
        assert_eq!(acc.flush(), Some(word("hello", 140)));
    }

    #[test]
    fn part_text_wins_over_transcription() {
        let mut acc = WordAccumulator::new();
        acc.on_transcript("ignored");
        acc.on_audio(Some("  salam "), 60);
        assert_eq!(acc.current(), Some(&word("salam", 60)));
    }

    #[test]
    fn audio_without_any_word_is_dropped() {
        let mut acc = WordAccumulator::new();
        assert_eq!(acc.on_audio(None, 100), None);
        assert_eq!(acc.on_audio(Some("   "), 100), None);
        assert_eq!(acc.flush(), None);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut acc = WordAccumulator::new();
        acc.on_audio(Some("salam"), 100);
        acc.on_transcript("pending");
        acc.clear();
        assert_eq!(acc.on_audio(None, 10), None);
        assert_eq!(acc.flush(), None);
    }
}
