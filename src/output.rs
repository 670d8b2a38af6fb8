//! Persistence of finished transcripts.
//!
//! The scheduler calls the writer once per succeeded job; everything about
//! the artifact (format, naming, destination) is the writer's concern.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::ModelProfile;
use crate::job::JobRecord;

/// Produces a persisted artifact for one finished job
#[async_trait]
pub trait TranscriptWriter: Send + Sync {
    /// Write the transcript and return the artifact path
    async fn write(&self, job: &JobRecord) -> Result<PathBuf>;
}

/// Writes one markdown file per transcript, named `{stem}_transcription.md`
pub struct MarkdownWriter {
    output_dir: PathBuf,
    include_speakers: bool,
    model_profile: ModelProfile,
}

impl MarkdownWriter {
    pub fn new(output_dir: impl Into<PathBuf>, model_profile: ModelProfile) -> Self {
        Self {
            output_dir: output_dir.into(),
            include_speakers: true,
            model_profile,
        }
    }

    /// Skip the speaker table even when segments carry labels
    pub fn without_speakers(mut self) -> Self {
        self.include_speakers = false;
        self
    }

    fn render(&self, job: &JobRecord) -> Result<String> {
        let transcript = job
            .result
            .as_ref()
            .context("job has no transcript to write")?;
        let stem = job
            .source_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "recording".to_string());
        let file_name = job
            .source_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| job.source_path.display().to_string());

        let mut lines = vec![
            format!("# {} - Voice Memo Transcription", stem),
            String::new(),
            format!("**File:** {}", file_name),
            format!("**Date:** {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
            format!(
                "**Language:** {}",
                transcript.language.as_deref().unwrap_or("Unknown")
            ),
            format!("**Duration:** {:.1} seconds", transcript.duration_seconds),
            format!("**Model:** {}", self.model_profile),
            String::new(),
            "## Transcription".to_string(),
            String::new(),
            transcript.text.clone(),
        ];

        if self.include_speakers && transcript.has_speakers() {
            lines.push(String::new());
            lines.push("## Speaker Analysis".to_string());
            lines.push(String::new());
            lines.push("| Time | Speaker | Text |".to_string());
            lines.push("|------|---------|------|".to_string());
            for segment in &transcript.segments {
                lines.push(format!(
                    "| {} | {} | {} |",
                    format_timestamp(segment.start),
                    segment.speaker.as_deref().unwrap_or("Unknown Speaker"),
                    segment.text.trim()
                ));
            }

            let speakers = transcript.speakers();
            if speakers.len() > 1 {
                lines.push(String::new());
                lines.push("## Speakers List".to_string());
                lines.push(String::new());
                for (index, speaker) in speakers.iter().enumerate() {
                    lines.push(format!("{}. {}", index + 1, speaker));
                }
            }
        }

        lines.push(String::new());
        Ok(lines.join("\n"))
    }

    fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "recording".to_string());
        self.output_dir.join(format!("{}_transcription.md", stem))
    }
}

#[async_trait]
impl TranscriptWriter for MarkdownWriter {
    async fn write(&self, job: &JobRecord) -> Result<PathBuf> {
        let content = self.render(job)?;
        let path = self.output_path(&job.source_path);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!("Transcript saved to {}", path.display());
        Ok(path)
    }
}

/// Convert seconds to HH:MM:SS
fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{Transcript, TranscriptSegment};
    use uuid::Uuid;

    fn job_with_transcript(segments: Vec<TranscriptSegment>) -> JobRecord {
        let mut record = JobRecord::new(
            Uuid::new_v4(),
            0,
            PathBuf::from("standup notes.wav"),
            3,
        );
        record.mark_running();
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        record.result = Some(Transcript::new(text, Some("en".to_string()), 65.0, segments));
        record
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00");
        assert_eq!(format_timestamp(75.4), "00:01:15");
        assert_eq!(format_timestamp(3725.0), "01:02:05");
    }

    #[tokio::test]
    async fn test_writes_markdown_with_speaker_table() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MarkdownWriter::new(dir.path(), ModelProfile::Base);
        let job = job_with_transcript(vec![
            TranscriptSegment::with_speaker("Speaker 1", 0.0, 30.0, "status update"),
            TranscriptSegment::with_speaker("Speaker 2", 30.0, 65.0, "sounds good"),
        ]);

        let path = writer.write(&job).await.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "standup notes_transcription.md"
        );

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# standup notes - Voice Memo Transcription"));
        assert!(content.contains("**Language:** en"));
        assert!(content.contains("**Duration:** 65.0 seconds"));
        assert!(content.contains("## Transcription"));
        assert!(content.contains("## Speaker Analysis"));
        assert!(content.contains("| 00:00:30 | Speaker 2 | sounds good |"));
        assert!(content.contains("## Speakers List"));
    }

    #[tokio::test]
    async fn test_no_speaker_table_without_labels() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MarkdownWriter::new(dir.path(), ModelProfile::Base);
        let job = job_with_transcript(vec![TranscriptSegment::new(0.0, 65.0, "just one voice")]);

        let path = writer.write(&job).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("just one voice"));
        assert!(!content.contains("## Speaker Analysis"));
    }

    #[tokio::test]
    async fn test_speaker_table_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MarkdownWriter::new(dir.path(), ModelProfile::Base).without_speakers();
        let job = job_with_transcript(vec![TranscriptSegment::with_speaker(
            "Speaker 1",
            0.0,
            65.0,
            "hello",
        )]);

        let path = writer.write(&job).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("## Speaker Analysis"));
    }

    #[tokio::test]
    async fn test_missing_transcript_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MarkdownWriter::new(dir.path(), ModelProfile::Base);
        let record = JobRecord::new(Uuid::new_v4(), 0, PathBuf::from("memo.wav"), 3);

        assert!(writer.write(&record).await.is_err());
    }
}
