//! Voxpool - a batch and folder-watch audio transcription service
//!
//! This crate orchestrates the transcription of audio files through an
//! external speech-recognition model. It features:
//!
//! - A bounded-concurrency scheduler with a FIFO ready set and per-job
//!   lifecycle tracking
//! - Linear-backoff retries for transient failures, driven through an
//!   explicit retry-wait state
//! - Long-audio windowing with overlap stitching and best-effort speaker
//!   label continuity
//! - External model worker processes speaking MessagePack over stdio
//! - A directory watcher for continuous operation and a batch mode for
//!   explicit file lists
//! - Running statistics and a broadcast stream of job transitions
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use voxpool::config::OrchestratorConfig;
//! use voxpool::model::{CommandModel, CommandModelConfig};
//! use voxpool::output::MarkdownWriter;
//! use voxpool::runner::BatchRunner;
//! use voxpool::scheduler::Scheduler;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OrchestratorConfig::default();
//!     let model = Arc::new(CommandModel::new(CommandModelConfig::default()));
//!     let writer = Arc::new(MarkdownWriter::new("transcriptions", config.model_profile));
//!
//!     let scheduler = Scheduler::new(config, model, writer);
//!     let report = BatchRunner::new(scheduler)
//!         .run(vec!["memo.wav".into()])
//!         .await?;
//!
//!     println!("succeeded: {}", report.stats.succeeded);
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod feed;
pub mod job;
pub mod model;
pub mod output;
pub mod runner;
pub mod scheduler;
pub mod stats;
pub mod transcript;
pub mod worker;

// Re-export commonly used types for convenience
pub use config::{ModelProfile, OrchestratorConfig, StopMode};
pub use job::{JobError, JobErrorKind, JobId, JobRecord, JobStatus};
pub use runner::{BackgroundRunner, BatchReport, BatchRunner, RunnerState};
pub use scheduler::{JobEvent, Scheduler};
pub use stats::{StatsAggregator, StatsSnapshot};
pub use transcript::{Transcript, TranscriptSegment};

use thiserror::Error as ThisError;

/// Errors surfaced synchronously by queue operations
#[derive(ThisError, Debug)]
pub enum Error {
    /// Malformed enqueue request
    #[error("invalid request: {0}")]
    Validation(String),

    /// The path already has a job in flight
    #[error("path already queued: {}", .0.display())]
    Duplicate(std::path::PathBuf),

    /// Status query for an unknown job id
    #[error("unknown job: {0}")]
    NotFound(JobId),
}

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "voxpool");
    }

    #[test]
    fn test_error_display() {
        let error = Error::Duplicate(std::path::PathBuf::from("memo.wav"));
        assert_eq!(error.to_string(), "path already queued: memo.wav");

        let error = Error::Validation("source path is empty".to_string());
        assert!(error.to_string().contains("source path is empty"));
    }
}
