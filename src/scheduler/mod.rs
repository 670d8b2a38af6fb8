//! Bounded-concurrency job scheduler.
//!
//! Admits work, dispatches it to transcription workers under the configured
//! concurrency cap, collects outcomes, and drives retries through an explicit
//! RETRY_WAIT state with timer-scheduled requeues. The scheduler is the only
//! writer of job lifecycle state; everyone else reads snapshots or subscribes
//! to transition events.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::job::{JobError, JobId, JobRecord, JobStatus};
use crate::model::SpeechModel;
use crate::output::TranscriptWriter;
use crate::stats::StatsAggregator;
use crate::transcript::Transcript;
use crate::worker::{TranscribeOptions, TranscriptionWorker};
use crate::{Error, Result};

/// One job state transition, announced to subscribers.
///
/// Each event corresponds to exactly one transition; ordering across
/// concurrently completing jobs is unspecified.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: JobId,
    pub source_path: PathBuf,
    pub status: JobStatus,
}

/// Bounded-concurrency dispatcher for transcription jobs
pub struct Scheduler<M: SpeechModel + 'static> {
    inner: Arc<Inner<M>>,
}

impl<M: SpeechModel + 'static> Clone for Scheduler<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<M> {
    config: OrchestratorConfig,
    worker: TranscriptionWorker<M>,
    writer: Arc<dyn TranscriptWriter>,
    stats: Arc<StatsAggregator>,
    /// Every record this run knows about, keyed by id
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    /// FIFO ready set; entries cancelled while queued are skipped on pop
    ready: Mutex<VecDeque<JobId>>,
    /// Source paths with a non-terminal job, for duplicate rejection
    in_flight: Mutex<HashSet<PathBuf>>,
    /// Cooperative cancellation flags for running jobs
    cancel_flags: Mutex<HashMap<JobId, Arc<AtomicBool>>>,
    running: AtomicUsize,
    seq: AtomicU64,
    wake: Notify,
    events: broadcast::Sender<JobEvent>,
}

impl<M: SpeechModel + 'static> Scheduler<M> {
    pub fn new(
        config: OrchestratorConfig,
        model: Arc<M>,
        writer: Arc<dyn TranscriptWriter>,
    ) -> Self {
        let config = config.normalized();
        let options = TranscribeOptions::from_config(&config);
        let (events, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(Inner {
                worker: TranscriptionWorker::new(model, options),
                writer,
                stats: Arc::new(StatsAggregator::new()),
                jobs: RwLock::new(HashMap::new()),
                ready: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(HashSet::new()),
                cancel_flags: Mutex::new(HashMap::new()),
                running: AtomicUsize::new(0),
                seq: AtomicU64::new(0),
                wake: Notify::new(),
                events,
                config,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> Arc<StatsAggregator> {
        Arc::clone(&self.inner.stats)
    }

    /// Subscribe to job state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Warm the model before dispatching real work
    pub async fn warm(&self) -> std::result::Result<(), JobError> {
        self.inner.worker.warm().await
    }

    /// Admit a new job in PENDING state.
    ///
    /// Rejects empty paths and paths that already have a non-terminal job;
    /// the same path may be enqueued again once its job finishes.
    pub async fn enqueue(&self, source_path: impl Into<PathBuf>) -> Result<JobId> {
        let path = source_path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::Validation("source path is empty".to_string()));
        }

        {
            let mut in_flight = self.inner.in_flight.lock().await;
            if !in_flight.insert(path.clone()) {
                return Err(Error::Duplicate(path));
            }
        }

        let id = Uuid::new_v4();
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
        let record = JobRecord::new(id, seq, path.clone(), self.inner.config.max_attempts);

        self.inner.jobs.write().await.insert(id, record);
        self.inner.stats.record_enqueued();
        self.inner.emit(id, &path, JobStatus::Pending);
        self.inner.ready.lock().await.push_back(id);
        self.inner.wake_dispatchers();

        debug!("Enqueued job {} for {}", id, path.display());
        Ok(id)
    }

    /// Read-only snapshot of one job
    pub async fn get_status(&self, id: JobId) -> Result<JobRecord> {
        self.inner
            .jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    /// Snapshots of every known job, in admission order
    pub async fn jobs_snapshot(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.inner.jobs.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Cancel a job.
    ///
    /// A queued job (PENDING or RETRY_WAIT) fails immediately with kind
    /// `Cancelled`. A running job is asked to stop at its next checkpoint;
    /// true means a cancellation was issued, false that the job was already
    /// terminal.
    pub async fn cancel(&self, id: JobId) -> Result<bool> {
        let (path, prior) = {
            let mut jobs = self.inner.jobs.write().await;
            let record = jobs.get_mut(&id).ok_or(Error::NotFound(id))?;

            match record.status {
                JobStatus::Pending | JobStatus::RetryWait => {
                    let prior = record.status;
                    record.mark_failed(JobError::cancelled());
                    self.inner.stats.record_terminal(record, prior);
                    (record.source_path.clone(), prior)
                }
                JobStatus::Running => {
                    drop(jobs);
                    let flags = self.inner.cancel_flags.lock().await;
                    if let Some(flag) = flags.get(&id) {
                        flag.store(true, Ordering::SeqCst);
                        info!("Requested cancellation of running job {}", id);
                        return Ok(true);
                    }
                    // completed between the status read and here
                    return Ok(false);
                }
                _ => return Ok(false),
            }
        };

        self.inner.in_flight.lock().await.remove(&path);
        self.inner.emit(id, &path, JobStatus::Failed);
        self.inner.wake_dispatchers();
        info!("Cancelled queued job {} (was {:?})", id, prior);
        Ok(true)
    }

    /// Request cancellation of every non-terminal job; returns how many
    /// requests were issued
    pub async fn cancel_active(&self) -> usize {
        let ids: Vec<JobId> = {
            let jobs = self.inner.jobs.read().await;
            jobs.values()
                .filter(|r| !r.status.is_terminal())
                .map(|r| r.id)
                .collect()
        };

        let mut cancelled = 0;
        for id in ids {
            if matches!(self.cancel(id).await, Ok(true)) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Drive the scheduling loop until the referenced jobs are terminal.
    ///
    /// With no ids given, drives every job queued at the time of the call.
    /// Work enqueued while this runs shares the worker slots but does not
    /// extend the wait.
    pub async fn run_to_completion(&self, job_ids: Option<Vec<JobId>>) {
        let targets: Vec<JobId> = match job_ids {
            Some(ids) => ids,
            None => self.inner.jobs.read().await.keys().copied().collect(),
        };

        loop {
            self.inner.fill_slots().await;
            let notified = self.inner.wake.notified();
            if self.inner.all_terminal(&targets).await {
                break;
            }
            notified.await;
        }
    }

    /// Drain the ready set continuously until the stop signal fires.
    ///
    /// Jobs already dispatched keep running after this returns; pair with
    /// [`Scheduler::wait_running_drained`] or [`Scheduler::cancel_active`].
    pub async fn run_until_stopped(&self, shutdown: &mut broadcast::Receiver<()>) {
        loop {
            self.inner.fill_slots().await;
            let notified = self.inner.wake.notified();
            tokio::select! {
                _ = notified => {}
                _ = shutdown.recv() => break,
            }
        }
        debug!("Scheduler drain loop stopped");
    }

    /// Wait until no job is running
    pub async fn wait_running_drained(&self) {
        loop {
            let notified = self.inner.wake.notified();
            if self.inner.running.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
    }

    /// Drop terminal records older than `max_age`; returns how many were
    /// removed
    pub async fn cleanup_completed(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let now = Utc::now();

        let mut jobs = self.inner.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| {
            if !record.status.is_terminal() {
                return true;
            }
            record.finished_at.map_or(true, |finished| now - finished < age)
        });
        let removed = before - jobs.len();

        if removed > 0 {
            debug!("Dropped {} old job records", removed);
        }
        removed
    }
}

impl<M: SpeechModel + 'static> Inner<M> {
    fn emit(&self, job_id: JobId, source_path: &Path, status: JobStatus) {
        let _ = self.events.send(JobEvent {
            job_id,
            source_path: source_path.to_path_buf(),
            status,
        });
    }

    /// Wake the dispatch loops. The stored permit covers a loop that is
    /// between its condition check and its wait.
    fn wake_dispatchers(&self) {
        self.wake.notify_waiters();
        self.wake.notify_one();
    }

    async fn all_terminal(&self, targets: &[JobId]) -> bool {
        let jobs = self.jobs.read().await;
        targets
            .iter()
            .all(|id| jobs.get(id).map_or(true, |r| r.status.is_terminal()))
    }

    /// Launch ready jobs until the cap is reached or the ready set is empty.
    ///
    /// A slot is reserved before a job is taken, so the running count can
    /// never exceed the cap even with several drain loops active.
    async fn fill_slots(self: &Arc<Self>) {
        loop {
            if !self.try_reserve_slot() {
                break;
            }

            let next = loop {
                let Some(id) = self.ready.lock().await.pop_front() else {
                    break None;
                };

                let mut jobs = self.jobs.write().await;
                let Some(record) = jobs.get_mut(&id) else {
                    continue;
                };
                // cancelled (or cleaned up) while queued
                if !matches!(record.status, JobStatus::Pending | JobStatus::RetryWait) {
                    continue;
                }
                record.mark_running();
                debug!(
                    "Dispatching job {} (attempt {}/{}) for {}",
                    id,
                    record.attempt_count,
                    record.max_attempts,
                    record.source_path.display()
                );
                break Some((id, record.source_path.clone()));
            };

            let Some((id, path)) = next else {
                self.release_slot();
                break;
            };

            let cancel = Arc::new(AtomicBool::new(false));
            self.cancel_flags.lock().await.insert(id, Arc::clone(&cancel));
            self.stats.record_dispatched();
            self.emit(id, &path, JobStatus::Running);

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = inner.execute(id, &path, &cancel).await;
                inner.complete(id, path, outcome).await;
            });
        }
    }

    fn try_reserve_slot(&self) -> bool {
        let cap = self.config.max_concurrent_workers;
        let mut current = self.running.load(Ordering::SeqCst);
        loop {
            if current >= cap {
                return false;
            }
            match self.running.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release_slot(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.wake_dispatchers();
    }

    /// Run one attempt: worker under timeout and panic isolation, then the
    /// output writer
    async fn execute(
        &self,
        id: JobId,
        path: &Path,
        cancel: &AtomicBool,
    ) -> std::result::Result<(Transcript, PathBuf), JobError> {
        let work = AssertUnwindSafe(self.worker.process(path, cancel)).catch_unwind();

        let transcript = match timeout(self.config.job_timeout(), work).await {
            Err(_) => {
                // The attempt future is gone; the flag stops anything the
                // model pool still has queued for this job
                cancel.store(true, Ordering::SeqCst);
                return Err(JobError::resource(format!(
                    "timed out after {:.0}s",
                    self.config.job_timeout_seconds
                )));
            }
            Ok(Err(panic)) => {
                return Err(JobError::model(format!(
                    "worker panicked: {}",
                    panic_message(&panic)
                )));
            }
            Ok(Ok(result)) => result?,
        };

        let mut record = match self.jobs.read().await.get(&id) {
            Some(record) => record.clone(),
            None => return Err(JobError::model("job record disappeared mid-flight")),
        };
        record.result = Some(transcript.clone());

        let output_path = self
            .writer
            .write(&record)
            .await
            .map_err(|e| JobError::resource(format!("failed to write transcript: {:#}", e)))?;

        Ok((transcript, output_path))
    }

    /// Record an attempt's outcome and route the job onward
    async fn complete(
        self: &Arc<Self>,
        id: JobId,
        path: PathBuf,
        outcome: std::result::Result<(Transcript, PathBuf), JobError>,
    ) {
        let mut terminal = false;
        let mut retry_attempt = None;
        let mut event_status = None;

        {
            let mut jobs = self.jobs.write().await;
            if let Some(record) = jobs.get_mut(&id) {
                match outcome {
                    Ok((transcript, output_path)) => {
                        info!(
                            "Job {} succeeded: {} -> {}",
                            id,
                            path.display(),
                            output_path.display()
                        );
                        record.mark_succeeded(transcript, output_path);
                        self.stats.record_terminal(record, JobStatus::Running);
                        terminal = true;
                    }
                    Err(job_error) => {
                        if job_error.is_retryable() && record.can_retry() {
                            warn!(
                                "Job {} attempt {}/{} failed, will retry: {}",
                                id, record.attempt_count, record.max_attempts, job_error
                            );
                            record.mark_retry_wait(job_error);
                            self.stats.record_retry_wait();
                            retry_attempt = Some(record.attempt_count);
                        } else {
                            error!("Job {} failed: {}", id, job_error);
                            record.mark_failed(job_error);
                            self.stats.record_terminal(record, JobStatus::Running);
                            terminal = true;
                        }
                    }
                }
                event_status = Some(record.status);
            }
        }

        if let Some(status) = event_status {
            self.emit(id, &path, status);
        }

        self.cancel_flags.lock().await.remove(&id);
        if terminal {
            self.in_flight.lock().await.remove(&path);
        }
        if let Some(attempt) = retry_attempt {
            self.schedule_retry(id, attempt);
        }

        self.release_slot();
    }

    /// Timer-scheduled re-entry into the ready set after the linear backoff
    fn schedule_retry(self: &Arc<Self>, id: JobId, attempt: u32) {
        let inner = Arc::clone(self);
        let delay = self.config.retry_delay(attempt);

        tokio::spawn(async move {
            sleep(delay).await;

            // a job cancelled during the wait stays failed
            let still_waiting = inner
                .jobs
                .read()
                .await
                .get(&id)
                .map_or(false, |r| r.status == JobStatus::RetryWait);

            if still_waiting {
                inner.ready.lock().await.push_back(id);
                inner.wake_dispatchers();
                debug!("Job {} re-entered the ready set", id);
            }
        });
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
