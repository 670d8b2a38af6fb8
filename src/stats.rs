use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

use crate::job::{JobRecord, JobStatus};

/// Point-in-time view of aggregate job statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    /// Jobs admitted but not running (retry waits count as pending)
    pub pending: usize,
    pub running: usize,
    /// Jobs that reached a terminal state
    pub total_processed: u64,
    /// Mean processing duration of attempts that ran, in seconds
    pub avg_duration_seconds: f64,
    /// Jobs waiting for a worker slot
    pub queue_depth: usize,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "succeeded={}, failed={}, pending={}, running={}, avg_time={:.2}s",
            self.succeeded, self.failed, self.pending, self.running, self.avg_duration_seconds
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: u64,
    failed: u64,
    pending: usize,
    running: usize,
    duration_sum_seconds: f64,
    duration_samples: u64,
}

/// Running totals maintained by the scheduler as jobs move through their
/// lifecycle. Reads never block on in-progress work; updates are serialized
/// so a snapshot is always a consistent view.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    counters: Mutex<Counters>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job was admitted to the queue
    pub(crate) fn record_enqueued(&self) {
        let mut counters = self.lock();
        counters.pending += 1;
    }

    /// A job moved from the ready set to a worker slot
    pub(crate) fn record_dispatched(&self) {
        let mut counters = self.lock();
        counters.pending = counters.pending.saturating_sub(1);
        counters.running += 1;
    }

    /// A running job failed transiently and is waiting out its backoff
    pub(crate) fn record_retry_wait(&self) {
        let mut counters = self.lock();
        counters.running = counters.running.saturating_sub(1);
        counters.pending += 1;
    }

    /// A job reached SUCCEEDED or FAILED. Called exactly once per job, with
    /// the status it held just before the terminal transition.
    pub(crate) fn record_terminal(&self, record: &JobRecord, prior: JobStatus) {
        let mut counters = self.lock();

        match prior {
            JobStatus::Running => counters.running = counters.running.saturating_sub(1),
            JobStatus::Pending | JobStatus::RetryWait => {
                counters.pending = counters.pending.saturating_sub(1)
            }
            _ => {}
        }

        match record.status {
            JobStatus::Succeeded => counters.succeeded += 1,
            JobStatus::Failed => counters.failed += 1,
            _ => {}
        }

        if let Some(duration) = record.processing_duration() {
            counters.duration_sum_seconds += duration.num_milliseconds() as f64 / 1000.0;
            counters.duration_samples += 1;
        }
    }

    /// Non-blocking consistent read of the current counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.lock();
        let avg = if counters.duration_samples > 0 {
            counters.duration_sum_seconds / counters.duration_samples as f64
        } else {
            0.0
        };

        StatsSnapshot {
            succeeded: counters.succeeded,
            failed: counters.failed,
            pending: counters.pending,
            running: counters.running,
            total_processed: counters.succeeded + counters.failed,
            avg_duration_seconds: avg,
            queue_depth: counters.pending,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().expect("stats lock poisoned")
    }
}
