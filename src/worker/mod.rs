//! Per-file transcription worker.
//!
//! Wraps the model boundary in a uniform contract for the scheduler: one call
//! per audio file, windowing and stitching handled here, failures mapped into
//! the job error taxonomy. Cancellation is cooperative; the flag is checked
//! between windows and no further windows are submitted once it is observed.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::audio::AudioClip;
use crate::config::{ModelProfile, OrchestratorConfig};
use crate::job::JobError;
use crate::model::{ModelFailure, ModelRequest, SpeechModel};
use crate::transcript::Transcript;

mod stitch;

pub use stitch::Stitcher;

/// Per-request knobs handed to the worker
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    pub model_profile: ModelProfile,
    /// None lets the model auto-detect
    pub language_hint: Option<String>,
    pub enable_speaker_labels: bool,
    pub window_seconds: f64,
    pub overlap_seconds: f64,
}

impl TranscribeOptions {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let hint = config.language_hint.trim();
        let language_hint = if hint.is_empty() || hint.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(hint.to_string())
        };

        Self {
            model_profile: config.model_profile,
            language_hint,
            enable_speaker_labels: config.enable_speaker_labels,
            window_seconds: config.segment_window_seconds as f64,
            overlap_seconds: config.segment_overlap_seconds as f64,
        }
    }
}

impl From<ModelFailure> for JobError {
    fn from(failure: ModelFailure) -> Self {
        match failure {
            ModelFailure::Input { message } => JobError::input(message),
            ModelFailure::Model { message } => JobError::model(message),
            ModelFailure::Resource { message } => JobError::resource(message),
        }
    }
}

/// Runs the speech model against one audio file at a time.
///
/// Holds no mutable state; any number of invocations may run concurrently
/// against the same worker.
pub struct TranscriptionWorker<M> {
    model: Arc<M>,
    options: TranscribeOptions,
}

impl<M: SpeechModel> TranscriptionWorker<M> {
    pub fn new(model: Arc<M>, options: TranscribeOptions) -> Self {
        Self { model, options }
    }

    /// Warm the model before the first real request
    pub async fn warm(&self) -> Result<(), JobError> {
        self.model.warm().await.map_err(JobError::from)
    }

    /// Transcribe one file, windowing long audio and stitching the results
    pub async fn process(&self, path: &Path, cancel: &AtomicBool) -> Result<Transcript, JobError> {
        let clip = AudioClip::load_wav(path).map_err(|e| JobError::input(e.to_string()))?;
        let duration = clip.duration_seconds();

        let windows = plan_windows(
            duration,
            self.options.window_seconds,
            self.options.overlap_seconds,
        );
        debug!(
            "Transcribing {} ({:.1}s, {} window(s))",
            path.display(),
            duration,
            windows.len()
        );

        let mut stitcher = Stitcher::new(self.options.overlap_seconds.max(1.0));

        for (start, end) in windows {
            if cancel.load(Ordering::Relaxed) {
                debug!(
                    "Cancellation observed before window at {:.1}s of {}",
                    start,
                    path.display()
                );
                return Err(JobError::cancelled());
            }

            let slice = clip.window(start, end);
            let request = ModelRequest {
                id: Uuid::new_v4(),
                audio: slice.samples,
                sample_rate: clip.sample_rate,
                language_hint: self.options.language_hint.clone(),
                model_profile: self.options.model_profile,
                enable_speaker_labels: self.options.enable_speaker_labels,
            };

            let output = self.model.transcribe(request).await?;
            stitcher.push(start, end - start, output);
        }

        Ok(stitcher.finish(duration))
    }
}

/// Split a clip into overlapping windows covering its full duration
fn plan_windows(duration: f64, window: f64, overlap: f64) -> Vec<(f64, f64)> {
    if duration <= window {
        return vec![(0.0, duration)];
    }

    let step = (window - overlap).max(0.1);
    let mut windows = Vec::new();
    let mut start = 0.0;

    loop {
        let end = (start + window).min(duration);
        windows.push((start, end));
        if end >= duration - 1e-9 {
            break;
        }
        start += step;
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobErrorKind;
    use crate::model::{ModelOutput, ModelSegment};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Model fake that replays a script of outcomes
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<ModelOutput, ModelFailure>>>,
        calls: AtomicUsize,
        cancel_on_first_call: Option<Arc<AtomicBool>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<ModelOutput, ModelFailure>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                cancel_on_first_call: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechModel for ScriptedModel {
        async fn transcribe(&self, _request: ModelRequest) -> Result<ModelOutput, ModelFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(flag) = &self.cancel_on_first_call {
                flag.store(true, Ordering::SeqCst);
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelFailure::model("script exhausted")))
        }
    }

    fn text_output(text: &str) -> Result<ModelOutput, ModelFailure> {
        Ok(ModelOutput {
            text: text.to_string(),
            language: Some("en".to_string()),
            segments: vec![ModelSegment {
                speaker: None,
                start: 0.0,
                end: 0.5,
                text: text.to_string(),
            }],
        })
    }

    fn write_wav(path: &Path, seconds: f64) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(seconds * 8000.0) as usize {
            writer
                .write_sample(((i % 128) as i16 - 64) * 200)
                .unwrap();
        }
        writer.finalize().unwrap();
    }

    fn options(window: f64, overlap: f64) -> TranscribeOptions {
        TranscribeOptions {
            model_profile: ModelProfile::Tiny,
            language_hint: None,
            enable_speaker_labels: false,
            window_seconds: window,
            overlap_seconds: overlap,
        }
    }

    #[test]
    fn test_plan_windows_short_clip() {
        assert_eq!(plan_windows(12.0, 30.0, 5.0), vec![(0.0, 12.0)]);
    }

    #[test]
    fn test_plan_windows_long_clip() {
        let windows = plan_windows(70.0, 30.0, 5.0);
        assert_eq!(windows, vec![(0.0, 30.0), (25.0, 55.0), (50.0, 70.0)]);
    }

    #[test]
    fn test_plan_windows_cover_full_duration() {
        let windows = plan_windows(100.0, 30.0, 5.0);
        assert_eq!(windows.first().unwrap().0, 0.0);
        assert!((windows.last().unwrap().1 - 100.0).abs() < 1e-9);
        for pair in windows.windows(2) {
            // Every window starts inside the previous one
            assert!(pair[1].0 < pair[0].1);
        }
    }

    #[tokio::test]
    async fn test_single_window_clip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, 1.0);

        let model = Arc::new(ScriptedModel::new(vec![text_output("hello world")]));
        let worker = TranscriptionWorker::new(Arc::clone(&model), options(30.0, 5.0));
        let cancel = AtomicBool::new(false);

        let transcript = worker.process(&path, &cancel).await.unwrap();
        assert_eq!(transcript.text, "hello world");
        assert_eq!(model.calls(), 1);
        assert!((transcript.duration_seconds - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_long_clip_is_windowed_and_stitched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_wav(&path, 2.4);

        // window 1.0s, overlap 0.2s -> windows at 0.0, 0.8, 1.6
        let model = Arc::new(ScriptedModel::new(vec![
            text_output("one"),
            text_output("two"),
            text_output("three"),
        ]));
        let worker = TranscriptionWorker::new(Arc::clone(&model), options(1.0, 0.2));
        let cancel = AtomicBool::new(false);

        let transcript = worker.process(&path, &cancel).await.unwrap();
        assert_eq!(model.calls(), 3);
        assert_eq!(transcript.text, "one two three");
        assert_eq!(transcript.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_cancellation_before_first_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.wav");
        write_wav(&path, 1.0);

        let model = Arc::new(ScriptedModel::new(vec![text_output("never used")]));
        let worker = TranscriptionWorker::new(Arc::clone(&model), options(30.0, 5.0));
        let cancel = AtomicBool::new(true);

        let error = worker.process(&path, &cancel).await.unwrap_err();
        assert_eq!(error.kind, JobErrorKind::Cancelled);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_between_windows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_wav(&path, 2.4);

        let cancel = Arc::new(AtomicBool::new(false));
        let mut model = ScriptedModel::new(vec![
            text_output("one"),
            text_output("two"),
            text_output("three"),
        ]);
        model.cancel_on_first_call = Some(Arc::clone(&cancel));
        let model = Arc::new(model);

        let worker = TranscriptionWorker::new(Arc::clone(&model), options(1.0, 0.2));
        let error = worker.process(&path, &cancel).await.unwrap_err();

        assert_eq!(error.kind, JobErrorKind::Cancelled);
        // The first window was already submitted; no later window was
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_maps_to_job_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.wav");
        write_wav(&path, 1.0);

        let model = Arc::new(ScriptedModel::new(vec![Err(ModelFailure::resource(
            "out of memory",
        ))]));
        let worker = TranscriptionWorker::new(model, options(30.0, 5.0));
        let cancel = AtomicBool::new(false);

        let error = worker.process(&path, &cancel).await.unwrap_err();
        assert_eq!(error.kind, JobErrorKind::Resource);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_input_error() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let worker = TranscriptionWorker::new(model, options(30.0, 5.0));
        let cancel = AtomicBool::new(false);

        let error = worker
            .process(&PathBuf::from("/no/such/file.wav"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(error.kind, JobErrorKind::Input);
    }
}
