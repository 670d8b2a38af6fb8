use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Speed/accuracy tradeoff requested from the speech model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProfile {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelProfile::Tiny => "tiny",
            ModelProfile::Base => "base",
            ModelProfile::Small => "small",
            ModelProfile::Medium => "medium",
            ModelProfile::Large => "large",
        }
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        ModelProfile::Medium
    }
}

impl FromStr for ModelProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tiny" => Ok(ModelProfile::Tiny),
            "base" => Ok(ModelProfile::Base),
            "small" => Ok(ModelProfile::Small),
            "medium" => Ok(ModelProfile::Medium),
            "large" => Ok(ModelProfile::Large),
            other => Err(format!(
                "unknown model profile '{}' (expected tiny|base|small|medium|large)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ModelProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with in-flight jobs when the background runner is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    /// Let running jobs finish, then stop
    Graceful,
    /// Cancel running jobs, then stop
    Forced,
}

impl Default for StopMode {
    fn default() -> Self {
        StopMode::Graceful
    }
}

/// Tunables for the job-processing core.
///
/// Deserializes with every field optional; unknown keys are ignored and
/// missing keys fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Worker slots running concurrently
    pub max_concurrent_workers: usize,
    /// Dispatches allowed per job
    pub max_attempts: u32,
    /// Base retry backoff; actual delay is this times the attempt count
    pub retry_delay_seconds: f64,
    /// Discovery feed poll interval
    pub poll_interval_seconds: f64,
    pub model_profile: ModelProfile,
    /// BCP-47 language code, or "auto" to let the model detect
    pub language_hint: String,
    pub enable_speaker_labels: bool,
    /// Window length for long-audio splitting
    pub segment_window_seconds: u32,
    /// Overlap between consecutive windows
    pub segment_overlap_seconds: u32,
    /// Wall-clock ceiling per dispatched job
    pub job_timeout_seconds: f64,
    pub stop_mode: StopMode,
    /// How long terminal records are kept before the retention sweep drops them
    pub retention_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 2,
            max_attempts: 3,
            retry_delay_seconds: 60.0,
            poll_interval_seconds: 30.0,
            model_profile: ModelProfile::default(),
            language_hint: "auto".to_string(),
            enable_speaker_labels: true,
            segment_window_seconds: 30,
            segment_overlap_seconds: 5,
            job_timeout_seconds: 600.0,
            stop_mode: StopMode::default(),
            retention_seconds: 3600,
        }
    }
}

impl OrchestratorConfig {
    /// Clamp out-of-range values to something workable, logging each adjustment
    pub fn normalized(mut self) -> Self {
        if self.max_concurrent_workers == 0 {
            warn!("max_concurrent_workers must be at least 1, using 1");
            self.max_concurrent_workers = 1;
        }
        if self.max_attempts == 0 {
            warn!("max_attempts must be at least 1, using 1");
            self.max_attempts = 1;
        }
        if self.retry_delay_seconds < 0.0 {
            warn!("retry_delay_seconds cannot be negative, using 0");
            self.retry_delay_seconds = 0.0;
        }
        if self.segment_window_seconds < 10 {
            warn!(
                "segment_window_seconds {} is too small, using 10",
                self.segment_window_seconds
            );
            self.segment_window_seconds = 10;
        }
        if self.segment_overlap_seconds >= self.segment_window_seconds {
            let overlap = self.segment_window_seconds / 2;
            warn!(
                "segment_overlap_seconds must be smaller than the window, using {}",
                overlap
            );
            self.segment_overlap_seconds = overlap;
        }
        if self.job_timeout_seconds <= 0.0 {
            warn!("job_timeout_seconds must be positive, using 600");
            self.job_timeout_seconds = 600.0;
        }
        self
    }

    /// Backoff before re-dispatching the given attempt
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds * attempt as f64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_seconds.max(0.01))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.job_timeout_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_workers, 2);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.model_profile, ModelProfile::Medium);
        assert_eq!(config.segment_window_seconds, 30);
        assert_eq!(config.segment_overlap_seconds, 5);
        assert_eq!(config.stop_mode, StopMode::Graceful);
    }

    #[test]
    fn test_unknown_and_missing_keys() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{"max_concurrent_workers": 4, "not_a_real_option": true}"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrent_workers, 4);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_normalized_clamps() {
        let config = OrchestratorConfig {
            max_concurrent_workers: 0,
            max_attempts: 0,
            retry_delay_seconds: -5.0,
            segment_window_seconds: 3,
            segment_overlap_seconds: 30,
            job_timeout_seconds: 0.0,
            ..OrchestratorConfig::default()
        }
        .normalized();

        assert_eq!(config.max_concurrent_workers, 1);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.retry_delay_seconds, 0.0);
        assert_eq!(config.segment_window_seconds, 10);
        assert!(config.segment_overlap_seconds < config.segment_window_seconds);
        assert_eq!(config.job_timeout_seconds, 600.0);
    }

    #[test]
    fn test_linear_backoff() {
        let config = OrchestratorConfig {
            retry_delay_seconds: 10.0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_secs(10));
        assert_eq!(config.retry_delay(2), Duration::from_secs(20));
        assert_eq!(config.retry_delay(3), Duration::from_secs(30));
    }

    #[test]
    fn test_model_profile_parsing() {
        assert_eq!("medium".parse::<ModelProfile>().unwrap(), ModelProfile::Medium);
        assert_eq!("LARGE".parse::<ModelProfile>().unwrap(), ModelProfile::Large);
        assert!("huge".parse::<ModelProfile>().is_err());
    }
}
