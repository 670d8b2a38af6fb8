//! Orchestration on top of the scheduler.
//!
//! The background runner pairs the scheduler with a discovery feed for
//! continuous operation; the batch runner is its finite counterpart for an
//! explicit file list.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::{OrchestratorConfig, StopMode};
use crate::feed::DiscoveryFeed;
use crate::job::{JobRecord, JobStatus};
use crate::model::SpeechModel;
use crate::scheduler::Scheduler;
use crate::stats::StatsSnapshot;
use crate::Error;

/// Lifecycle of the continuous runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Stopped,
    Starting,
    Watching,
    Stopping,
}

/// Long-lived loop that polls the discovery feed and keeps the scheduler
/// draining until asked to stop
pub struct BackgroundRunner<M: SpeechModel + 'static> {
    scheduler: Scheduler<M>,
    feed: Mutex<Box<dyn DiscoveryFeed>>,
    config: OrchestratorConfig,
    state: watch::Sender<RunnerState>,
    shutdown: broadcast::Sender<()>,
    /// Canonical paths already handed to the scheduler, as a safety net on
    /// top of the feed's own dedup
    seen: Mutex<HashSet<PathBuf>>,
}

impl<M: SpeechModel + 'static> BackgroundRunner<M> {
    pub fn new(scheduler: Scheduler<M>, feed: Box<dyn DiscoveryFeed>) -> Self {
        let config = scheduler.config().clone();
        let (state, _) = watch::channel(RunnerState::Stopped);
        let (shutdown, _) = broadcast::channel(4);

        Self {
            scheduler,
            feed: Mutex::new(feed),
            config,
            state,
            shutdown,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Observe state transitions without polling
    pub fn watch_state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Signal the run loop to stop; in-flight handling follows the
    /// configured stop mode
    pub fn request_stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Run until stopped: warm the model, then poll the feed and enqueue
    /// every newly observed path while the scheduler drains continuously
    pub async fn run(&self) -> Result<()> {
        self.state.send_replace(RunnerState::Starting);
        info!(
            "Starting background runner ({} worker slot(s), polling every {:.0}s)",
            self.config.max_concurrent_workers, self.config.poll_interval_seconds
        );

        if let Err(e) = self.scheduler.warm().await {
            self.state.send_replace(RunnerState::Stopped);
            return Err(anyhow!("model warm-up failed: {}", e));
        }

        self.state.send_replace(RunnerState::Watching);

        // Scheduler drains in its own task while this loop feeds it
        let drain_handle = {
            let scheduler = self.scheduler.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                scheduler.run_until_stopped(&mut shutdown_rx).await;
            })
        };
        let reporter_handle = self.spawn_stats_reporter();

        let mut poll = interval(self.config.poll_interval());
        let mut sweep = interval(self.config.retention().max(Duration::from_secs(60)));
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.poll_feed().await;
                }
                _ = sweep.tick() => {
                    let removed = self.scheduler.cleanup_completed(self.config.retention()).await;
                    if removed > 0 {
                        debug!("Retention sweep removed {} record(s)", removed);
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        self.state.send_replace(RunnerState::Stopping);
        info!("Stopping background runner");

        if self.config.stop_mode == StopMode::Forced {
            let cancelled = self.scheduler.cancel_active().await;
            if cancelled > 0 {
                info!("Requested cancellation of {} active job(s)", cancelled);
            }
        }
        self.scheduler.wait_running_drained().await;

        reporter_handle.abort();
        let _ = drain_handle.await;

        self.state.send_replace(RunnerState::Stopped);
        info!("Background runner stopped");
        Ok(())
    }

    async fn poll_feed(&self) {
        let paths = {
            let mut feed = self.feed.lock().await;
            match feed.poll().await {
                Ok(paths) => paths,
                Err(e) => {
                    error!("Discovery feed poll failed: {:#}", e);
                    return;
                }
            }
        };

        for path in paths {
            let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            {
                let mut seen = self.seen.lock().await;
                if !seen.insert(canonical) {
                    continue;
                }
            }

            match self.scheduler.enqueue(path.clone()).await {
                Ok(id) => info!("Queued {} as job {}", path.display(), id),
                Err(Error::Duplicate(_)) => {
                    debug!("Already in flight: {}", path.display());
                }
                Err(e) => warn!("Could not enqueue {}: {}", path.display(), e),
            }
        }
    }

    fn spawn_stats_reporter(&self) -> tokio::task::JoinHandle<()> {
        let stats = self.scheduler.stats();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(60));
            tick.tick().await; // skip the immediate first fire
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        info!("Service stats: {}", stats.snapshot());
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }
}

/// Result of a finite batch run
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchReport {
    /// Per-job records in admission order
    pub jobs: Vec<JobRecord>,
    /// Aggregate statistics at the end of the run
    pub stats: StatsSnapshot,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.jobs.iter().all(|j| j.status == JobStatus::Succeeded)
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.iter().filter(|j| j.status == JobStatus::Failed)
    }
}

/// Enqueue an explicit list of files, drive them to completion, and report
pub struct BatchRunner<M: SpeechModel + 'static> {
    scheduler: Scheduler<M>,
}

impl<M: SpeechModel + 'static> BatchRunner<M> {
    pub fn new(scheduler: Scheduler<M>) -> Self {
        Self { scheduler }
    }

    pub async fn run(&self, paths: Vec<PathBuf>) -> Result<BatchReport> {
        self.scheduler
            .warm()
            .await
            .map_err(|e| anyhow!("model warm-up failed: {}", e))?;

        let mut ids = Vec::new();
        for path in paths {
            match self.scheduler.enqueue(path.clone()).await {
                Ok(id) => ids.push(id),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        info!("Processing batch of {} file(s)", ids.len());
        self.scheduler.run_to_completion(Some(ids.clone())).await;

        let jobs: Vec<JobRecord> = self
            .scheduler
            .jobs_snapshot()
            .await
            .into_iter()
            .filter(|record| ids.contains(&record.id))
            .collect();

        Ok(BatchReport {
            jobs,
            stats: self.scheduler.stats().snapshot(),
        })
    }
}
