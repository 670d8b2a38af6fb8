use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Failure while reading audio from disk
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: hound::Error,
    },
    #[error("{path} contains no audio samples")]
    Empty { path: String },
}

/// Mono audio samples held in memory for windowing.
///
/// Multi-channel input is downmixed by averaging; integer sample formats are
/// normalized to f32 in [-1.0, 1.0].
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Load a WAV file from disk
    pub fn load_wav(path: &Path) -> Result<Self, AudioError> {
        let path_str = path.display().to_string();
        let read_err = |source| AudioError::Read {
            path: path_str.clone(),
            source,
        };

        let reader = hound::WavReader::open(path).map_err(read_err)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(read_err)?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(read_err)?
            }
        };

        if interleaved.is_empty() {
            return Err(AudioError::Empty { path: path_str });
        }

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        debug!(
            "Loaded {} ({} samples at {} Hz, {:.2}s)",
            path_str,
            samples.len(),
            spec.sample_rate,
            samples.len() as f64 / spec.sample_rate as f64
        );

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Duration of the clip in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Copy out the samples between two offsets, clamped to the clip bounds
    pub fn window(&self, start_seconds: f64, end_seconds: f64) -> AudioClip {
        let start = ((start_seconds * self.sample_rate as f64) as usize).min(self.samples.len());
        let end = ((end_seconds * self.sample_rate as f64).ceil() as usize)
            .min(self.samples.len())
            .max(start);

        AudioClip {
            samples: self.samples[start..end].to_vec(),
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_wav(path: &Path, seconds: f64, sample_rate: u32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (seconds * sample_rate as f64) as usize;
        for i in 0..frames {
            let value = ((i as f32 / sample_rate as f32) * 440.0 * 2.0 * std::f32::consts::PI)
                .sin()
                * 0.2;
            for _ in 0..channels {
                writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 1.0, 8000, 1);

        let clip = AudioClip::load_wav(&path).unwrap();
        assert_eq!(clip.sample_rate, 8000);
        assert_eq!(clip.samples.len(), 8000);
        assert!((clip.duration_seconds() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 0.5, 8000, 2);

        let clip = AudioClip::load_wav(&path).unwrap();
        assert_eq!(clip.samples.len(), 4000);
    }

    #[test]
    fn test_window_slicing() {
        let clip = AudioClip {
            samples: vec![0.0; 16000],
            sample_rate: 8000,
        };

        let window = clip.window(0.5, 1.5);
        assert_eq!(window.samples.len(), 8000);

        // Windows past the end clamp instead of panicking
        let tail = clip.window(1.5, 3.0);
        assert_eq!(tail.samples.len(), 4000);

        let empty = clip.window(5.0, 6.0);
        assert!(empty.samples.is_empty());
    }

    #[test]
    fn test_float_format_wav() {
        use rand::Rng;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..16000 {
            writer.write_sample(rng.gen_range(-0.5f32..0.5)).unwrap();
        }
        writer.finalize().unwrap();

        let clip = AudioClip::load_wav(&path).unwrap();
        assert_eq!(clip.samples.len(), 16000);
        assert!(clip.samples.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = AudioClip::load_wav(&PathBuf::from("/no/such/memo.wav"));
        assert!(matches!(result, Err(AudioError::Read { .. })));
    }
}
