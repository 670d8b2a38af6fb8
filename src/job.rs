use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::transcript::Transcript;

/// Unique handle for one transcription job
pub type JobId = Uuid;

/// Where a job is in its processing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted, waiting for a worker slot
    Pending,
    /// Dispatched to a worker
    Running,
    /// Failed transiently, waiting out the retry backoff
    RetryWait,
    /// Finished with a transcript
    Succeeded,
    /// Finished without a transcript
    Failed,
}

impl JobStatus {
    /// Whether this status is final
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Classification of a job-execution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Unreadable or corrupt input, retrying cannot help
    Input,
    /// Inference-time failure, plausibly resolved by retrying
    Model,
    /// Timeout or resource exhaustion, retryable with backoff
    Resource,
    /// Stopped by explicit request, terminal
    Cancelled,
}

impl JobErrorKind {
    /// Whether a failure of this kind should re-enter the queue
    pub fn is_retryable(self) -> bool {
        matches!(self, JobErrorKind::Model | JobErrorKind::Resource)
    }
}

/// An execution failure captured on a job record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Input,
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Model,
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Resource,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: JobErrorKind::Cancelled,
            message: "cancelled by request".to_string(),
        }
    }

    /// Whether this failure should re-enter the queue
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            JobErrorKind::Input => "input",
            JobErrorKind::Model => "model",
            JobErrorKind::Resource => "resource",
            JobErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}: {}", kind, self.message)
    }
}

/// State container for one file's processing lifecycle.
///
/// Lifecycle fields are mutated only by the scheduler; everyone else sees
/// read-only snapshots via `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    /// Unique identifier, assigned at enqueue time
    pub id: JobId,
    /// Monotonic admission sequence number, for deterministic ordering
    pub seq: u64,
    /// Input audio file location
    pub source_path: PathBuf,
    pub status: JobStatus,
    /// Number of dispatches so far
    pub attempt_count: u32,
    /// Configured dispatch ceiling
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Start of the most recent attempt
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Populated only on success
    pub result: Option<Transcript>,
    /// Populated on failure and while waiting for a retry
    pub error: Option<JobError>,
    /// Where the formatted transcript was written
    pub output_path: Option<PathBuf>,
}

impl JobRecord {
    /// Create a new pending record
    pub fn new(id: JobId, seq: u64, source_path: PathBuf, max_attempts: u32) -> Self {
        Self {
            id,
            seq,
            source_path,
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            output_path: None,
        }
    }

    /// Whether another dispatch is allowed
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Processing duration of the final attempt, once finished
    pub fn processing_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some(finished - started),
            _ => None,
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempt_count += 1;
        self.started_at = Some(Utc::now());
        self.error = None;
    }

    pub(crate) fn mark_succeeded(&mut self, transcript: Transcript, output_path: PathBuf) {
        self.status = JobStatus::Succeeded;
        self.result = Some(transcript);
        self.output_path = Some(output_path);
        self.error = None;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_retry_wait(&mut self, error: JobError) {
        self.status = JobStatus::RetryWait;
        self.error = Some(error);
    }

    pub(crate) fn mark_failed(&mut self, error: JobError) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.result = None;
        self.finished_at = Some(Utc::now());
    }
}
