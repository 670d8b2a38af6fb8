use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-bounded span of transcript text, optionally attributed to a speaker.
///
/// Times are seconds from the start of the source file. Speaker labels are
/// per-run identifiers ("Speaker 1", "Speaker 2", ...) and distinguish talkers
/// within a file; they are not stable across files or runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Speaker label, if attribution was enabled and available
    pub speaker: Option<String>,
    /// Segment start in seconds
    pub start: f64,
    /// Segment end in seconds
    pub end: f64,
    /// Transcribed text for this span
    pub text: String,
}

impl TranscriptSegment {
    /// Create a segment without speaker attribution
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            speaker: None,
            start,
            end,
            text: text.into(),
        }
    }

    /// Create a segment attributed to a speaker
    pub fn with_speaker(
        speaker: impl Into<String>,
        start: f64,
        end: f64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            speaker: Some(speaker.into()),
            start,
            end,
            text: text.into(),
        }
    }
}

/// Finished transcript for one audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Full transcribed text
    pub text: String,
    /// Detected language (ISO 639-1 code), if the model reported one
    pub language: Option<String>,
    /// Duration of the source audio in seconds
    pub duration_seconds: f64,
    /// Ordered segments covering the transcript
    pub segments: Vec<TranscriptSegment>,
    /// Timestamp when transcription was completed
    pub created_at: DateTime<Utc>,
}

impl Transcript {
    /// Create a new transcript with the given parameters
    pub fn new(
        text: impl Into<String>,
        language: Option<String>,
        duration_seconds: f64,
        segments: Vec<TranscriptSegment>,
    ) -> Self {
        Self {
            text: text.into(),
            language,
            duration_seconds,
            segments,
            created_at: Utc::now(),
        }
    }

    /// Distinct speaker labels in order of first appearance
    pub fn speakers(&self) -> Vec<&str> {
        let mut speakers: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Some(label) = segment.speaker.as_deref() {
                if !speakers.contains(&label) {
                    speakers.push(label);
                }
            }
        }
        speakers
    }

    /// Whether any segment carries a speaker label
    pub fn has_speakers(&self) -> bool {
        self.segments.iter().any(|s| s.speaker.is_some())
    }
}
