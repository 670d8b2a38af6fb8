use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use voxpool::config::{OrchestratorConfig, StopMode};
use voxpool::feed::{collect_audio_files, DirectoryFeed};
use voxpool::model::{CommandModel, CommandModelConfig};
use voxpool::output::MarkdownWriter;
use voxpool::runner::{BackgroundRunner, BatchRunner};
use voxpool::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "voxpool")]
#[command(about = "Batch and folder-watch audio transcription service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Audio files or directories to transcribe in batch mode
    pub inputs: Vec<PathBuf>,

    /// Watch a directory and transcribe new files as they appear
    /// (repeatable; enables continuous mode)
    #[arg(long)]
    pub watch_dir: Vec<PathBuf>,

    /// Directory for formatted transcripts
    #[arg(long, default_value = "transcriptions")]
    pub output_dir: PathBuf,

    /// Number of concurrent transcription workers
    #[arg(long, default_value = "2")]
    pub workers: usize,

    /// Dispatch attempts allowed per file
    #[arg(long, default_value = "3")]
    pub max_attempts: u32,

    /// Base retry backoff in seconds (linear per attempt)
    #[arg(long, default_value = "60")]
    pub retry_delay: f64,

    /// Watch-mode poll interval in seconds
    #[arg(long, default_value = "30")]
    pub poll_interval: f64,

    /// Model profile (tiny, base, small, medium, large)
    #[arg(long, default_value = "medium")]
    pub model: String,

    /// Language hint as a BCP-47 code, or "auto" to detect
    #[arg(long, default_value = "auto")]
    pub language: String,

    /// Disable speaker labels in transcripts
    #[arg(long)]
    pub no_speaker_labels: bool,

    /// Window length in seconds for long-audio splitting
    #[arg(long, default_value = "30")]
    pub window: u32,

    /// Overlap in seconds between consecutive windows
    #[arg(long, default_value = "5")]
    pub overlap: u32,

    /// Wall-clock ceiling per job in seconds
    #[arg(long, default_value = "600")]
    pub job_timeout: f64,

    /// Command used to launch model worker processes
    #[arg(long, default_value = "uv")]
    pub model_cmd: String,

    /// Arguments passed to the model command
    #[arg(long, default_value = "run python/transcriber.py")]
    pub model_args: String,

    /// Working directory for model worker processes
    #[arg(long)]
    pub model_workdir: Option<PathBuf>,

    /// Cancel in-flight jobs on shutdown instead of letting them finish
    #[arg(long)]
    pub force_stop: bool,

    /// Print the batch report as JSON instead of a text summary
    #[arg(long)]
    pub json: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl Args {
    fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let model_profile = self
            .model
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(OrchestratorConfig {
            max_concurrent_workers: self.workers,
            max_attempts: self.max_attempts,
            retry_delay_seconds: self.retry_delay,
            poll_interval_seconds: self.poll_interval,
            model_profile,
            language_hint: self.language.clone(),
            enable_speaker_labels: !self.no_speaker_labels,
            segment_window_seconds: self.window,
            segment_overlap_seconds: self.overlap,
            job_timeout_seconds: self.job_timeout,
            stop_mode: if self.force_stop {
                StopMode::Forced
            } else {
                StopMode::Graceful
            },
            ..OrchestratorConfig::default()
        })
    }

    fn model_config(&self) -> CommandModelConfig {
        CommandModelConfig {
            command: self.model_cmd.clone(),
            args: self
                .model_args
                .split_whitespace()
                .map(|s| s.to_string())
                .collect(),
            working_dir: self.model_workdir.clone(),
            env_vars: Vec::new(),
            processes: self.workers.max(1),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level: tracing::Level = args.log_level.into();
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    if args.inputs.is_empty() && args.watch_dir.is_empty() {
        bail!("nothing to do: pass audio files/directories or --watch-dir");
    }

    info!("Starting voxpool v{}", env!("CARGO_PKG_VERSION"));

    let config = args.orchestrator_config()?;
    let model = Arc::new(CommandModel::new(args.model_config()));
    let writer = {
        let writer = MarkdownWriter::new(&args.output_dir, config.model_profile);
        if args.no_speaker_labels {
            Arc::new(writer.without_speakers())
        } else {
            Arc::new(writer)
        }
    };
    let scheduler = Scheduler::new(config, model, writer);

    if args.watch_dir.is_empty() {
        run_batch(&args, scheduler).await
    } else {
        run_watch(&args, scheduler).await
    }
}

/// Transcribe an explicit file list, then exit non-zero if anything failed
async fn run_batch(args: &Args, scheduler: Scheduler<CommandModel>) -> Result<()> {
    let mut files = Vec::new();
    for input in &args.inputs {
        if input.is_dir() {
            let mut found = collect_audio_files(input);
            found.sort();
            if found.is_empty() {
                warn!("No audio files found under {}", input.display());
            }
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }

    if files.is_empty() {
        bail!("no audio files to process");
    }

    let report = BatchRunner::new(scheduler)
        .run(files)
        .await
        .context("batch run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.all_succeeded() {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!();
    println!("Processed {} file(s):", report.jobs.len());
    for job in &report.jobs {
        match job.status {
            voxpool::JobStatus::Succeeded => {
                let output = job
                    .output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("  ok     {} -> {}", job.source_path.display(), output);
            }
            _ => {
                let reason = job
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                println!("  FAILED {} ({})", job.source_path.display(), reason);
            }
        }
    }
    println!(
        "succeeded={}, failed={}, avg_time={:.2}s",
        report.stats.succeeded, report.stats.failed, report.stats.avg_duration_seconds
    );

    if !report.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

/// Watch directories until interrupted
async fn run_watch(args: &Args, scheduler: Scheduler<CommandModel>) -> Result<()> {
    for dir in &args.watch_dir {
        info!("Watching {}", dir.display());
    }

    let feed = DirectoryFeed::new(args.watch_dir.clone());
    let runner = Arc::new(BackgroundRunner::new(scheduler, Box::new(feed)));

    {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down");
                runner.request_stop();
            }
        });
    }

    if let Err(e) = runner.run().await {
        error!("Background runner error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
