//! Stitching of per-window model output into one transcript.
//!
//! Windows overlap, so three things need reconciling when a new window is
//! appended: segment times shift from window-local to global offsets, text in
//! the overlap region is taken from the later window, and window-local speaker
//! labels are carried across the boundary where a plausible predecessor
//! exists. Label continuity is a heuristic; labels are per-run identifiers,
//! not verified identities.

use crate::model::{ModelOutput, ModelSegment};
use crate::transcript::{Transcript, TranscriptSegment};

const TIME_EPSILON: f64 = 1e-6;

/// Accumulates window outputs in submission order and produces the transcript
pub struct Stitcher {
    /// Tolerance for matching a window's speakers to earlier ones
    tolerance: f64,
    segments: Vec<TranscriptSegment>,
    /// Per-window language detections, in order
    languages: Vec<String>,
    /// Global label and the end time of its latest segment
    speaker_ends: Vec<(String, f64)>,
    minted: usize,
}

impl Stitcher {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            segments: Vec::new(),
            languages: Vec::new(),
            speaker_ends: Vec::new(),
            minted: 0,
        }
    }

    /// Append the output for the window starting at `offset` seconds
    pub fn push(&mut self, offset: f64, window_duration: f64, output: ModelOutput) {
        let mut segments = output.segments;
        if segments.is_empty() && !output.text.trim().is_empty() {
            // Text-only backend output becomes a single unattributed span
            segments.push(ModelSegment {
                speaker: None,
                start: 0.0,
                end: window_duration,
                text: output.text.clone(),
            });
        }

        // The overlap region starts where this window starts; whatever the
        // earlier window produced there is superseded.
        self.segments
            .retain(|existing| existing.start < offset - TIME_EPSILON);

        let mapping = self.map_speakers(offset, &segments);

        for segment in segments {
            let speaker = segment.speaker.as_deref().and_then(|local| {
                mapping
                    .iter()
                    .find(|(from, _)| from == local)
                    .map(|(_, to)| to.clone())
            });
            let start = offset + segment.start;
            let end = offset + segment.end;

            if let Some(ref label) = speaker {
                match self.speaker_ends.iter_mut().find(|(l, _)| l == label) {
                    Some(entry) => entry.1 = end,
                    None => self.speaker_ends.push((label.clone(), end)),
                }
            }

            self.segments.push(TranscriptSegment {
                speaker,
                start,
                end,
                text: segment.text,
            });
        }

        if let Some(language) = output.language {
            self.languages.push(language);
        }
    }

    /// Resolve the window's local labels to global ones.
    ///
    /// A local label is carried forward to the global label whose latest
    /// segment ends closest in time to the local label's first segment start,
    /// within the tolerance; otherwise a fresh label is minted. Each global
    /// label is claimed at most once per window.
    fn map_speakers(&mut self, offset: f64, segments: &[ModelSegment]) -> Vec<(String, String)> {
        let mut mapping: Vec<(String, String)> = Vec::new();
        let mut claimed: Vec<String> = Vec::new();

        for segment in segments {
            let Some(local) = segment.speaker.as_deref() else {
                continue;
            };
            if mapping.iter().any(|(from, _)| from == local) {
                continue;
            }

            let first_start = offset + segment.start;
            let best = self
                .speaker_ends
                .iter()
                .filter(|(label, _)| !claimed.iter().any(|c| c == label))
                .map(|(label, end)| (label.clone(), (end - first_start).abs()))
                .filter(|(_, distance)| *distance <= self.tolerance)
                .min_by(|a, b| a.1.total_cmp(&b.1));

            let global = match best {
                Some((label, _)) => label,
                None => {
                    self.minted += 1;
                    format!("Speaker {}", self.minted)
                }
            };

            claimed.push(global.clone());
            mapping.push((local.to_string(), global));
        }

        mapping
    }

    /// Finish stitching and build the transcript
    pub fn finish(self, duration_seconds: f64) -> Transcript {
        let text = self
            .segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let language = dominant_language(&self.languages);

        Transcript::new(text, language, duration_seconds, self.segments)
    }
}

/// Most frequent detection wins; ties go to the earliest seen
fn dominant_language(languages: &[String]) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for language in languages {
        let count = languages.iter().filter(|l| *l == language).count();
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((language, count)),
        }
    }
    best.map(|(language, _)| language.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(segments: Vec<ModelSegment>, language: Option<&str>) -> ModelOutput {
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        ModelOutput {
            text,
            language: language.map(|l| l.to_string()),
            segments,
        }
    }

    fn segment(speaker: Option<&str>, start: f64, end: f64, text: &str) -> ModelSegment {
        ModelSegment {
            speaker: speaker.map(|s| s.to_string()),
            start,
            end,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_overlap_text_taken_from_later_window() {
        let mut stitcher = Stitcher::new(5.0);

        // Windows of 20s with a 10s overlap; "bravo shared" sits in the
        // overlap and must survive only in the later window's rendering.
        stitcher.push(
            0.0,
            20.0,
            output(
                vec![
                    segment(None, 0.0, 10.0, "alpha"),
                    segment(None, 10.0, 20.0, "bravo shared"),
                ],
                Some("en"),
            ),
        );
        stitcher.push(
            10.0,
            20.0,
            output(
                vec![
                    segment(None, 0.0, 10.0, "bravo later"),
                    segment(None, 10.0, 20.0, "charlie"),
                ],
                Some("en"),
            ),
        );

        let transcript = stitcher.finish(30.0);
        assert_eq!(transcript.text, "alpha bravo later charlie");
        assert_eq!(transcript.segments.len(), 3);
        assert_eq!(transcript.segments[1].start, 10.0);
        assert_eq!(transcript.segments[1].end, 20.0);
        assert_eq!(transcript.segments[2].end, 30.0);
    }

    #[test]
    fn test_segment_times_shift_to_global_offsets() {
        let mut stitcher = Stitcher::new(1.0);
        stitcher.push(
            25.0,
            30.0,
            output(vec![segment(None, 2.0, 6.0, "hello")], None),
        );

        let transcript = stitcher.finish(55.0);
        assert_eq!(transcript.segments[0].start, 27.0);
        assert_eq!(transcript.segments[0].end, 31.0);
    }

    #[test]
    fn test_speaker_carried_across_boundary() {
        let mut stitcher = Stitcher::new(5.0);

        stitcher.push(
            0.0,
            20.0,
            output(vec![segment(Some("S0"), 0.0, 18.0, "first part")], None),
        );
        // The new window's S0 starts right where the old speaker stopped
        stitcher.push(
            15.0,
            20.0,
            output(
                vec![
                    segment(Some("S0"), 3.0, 10.0, "second part"),
                    segment(Some("S1"), 10.0, 20.0, "someone else"),
                ],
                None,
            ),
        );

        let transcript = stitcher.finish(35.0);
        let speakers: Vec<_> = transcript
            .segments
            .iter()
            .map(|s| s.speaker.as_deref())
            .collect();
        assert_eq!(
            speakers,
            vec![Some("Speaker 1"), Some("Speaker 1"), Some("Speaker 2")]
        );
    }

    #[test]
    fn test_speaker_minted_when_gap_exceeds_tolerance() {
        let mut stitcher = Stitcher::new(2.0);

        stitcher.push(
            0.0,
            10.0,
            output(vec![segment(Some("S0"), 0.0, 3.0, "early")], None),
        );
        // Next window's speaker starts 17s after the previous one ended
        stitcher.push(
            10.0,
            10.0,
            output(vec![segment(Some("S0"), 10.0, 15.0, "late")], None),
        );

        let transcript = stitcher.finish(25.0);
        assert_eq!(
            transcript.segments[0].speaker.as_deref(),
            Some("Speaker 1")
        );
        assert_eq!(
            transcript.segments[1].speaker.as_deref(),
            Some("Speaker 2")
        );
    }

    #[test]
    fn test_text_only_output_becomes_one_segment() {
        let mut stitcher = Stitcher::new(1.0);
        stitcher.push(
            0.0,
            12.0,
            ModelOutput {
                text: "just text".to_string(),
                language: Some("en".to_string()),
                segments: vec![],
            },
        );

        let transcript = stitcher.finish(12.0);
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.segments[0].end, 12.0);
        assert_eq!(transcript.text, "just text");
    }

    #[test]
    fn test_dominant_language() {
        let langs = vec!["en".to_string(), "hi".to_string(), "hi".to_string()];
        assert_eq!(dominant_language(&langs), Some("hi".to_string()));

        // Ties go to the earliest detection
        let tied = vec!["en".to_string(), "hi".to_string()];
        assert_eq!(dominant_language(&tied), Some("en".to_string()));

        assert_eq!(dominant_language(&[]), None);
    }
}
