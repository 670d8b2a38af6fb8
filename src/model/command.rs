//! Model backend that delegates to external worker processes.
//!
//! One process is spawned per pool slot and fed requests round-robin. Frames
//! are hex-encoded MessagePack, one per line, over stdin/stdout; stderr is
//! relayed into the log. A process that fails an exchange is respawned so the
//! retry path gets a fresh one.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::{ModelFailure, ModelOutput, ModelReply, ModelRequest, SpeechModel};
use async_trait::async_trait;

/// Configuration for external model worker processes
#[derive(Debug, Clone)]
pub struct CommandModelConfig {
    /// Executable used to launch a worker (defaults to "uv")
    pub command: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Working directory for the processes
    pub working_dir: Option<PathBuf>,
    /// Environment variables
    pub env_vars: Vec<(String, String)>,
    /// Pool size; one process per worker slot
    pub processes: usize,
}

impl Default for CommandModelConfig {
    fn default() -> Self {
        Self {
            command: "uv".to_string(),
            args: vec!["run".to_string(), "python/transcriber.py".to_string()],
            working_dir: None,
            env_vars: Vec::new(),
            processes: 2,
        }
    }
}

/// One spawned worker process and its line-oriented stdio
struct ModelProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ModelProcess {
    async fn spawn(config: &CommandModelConfig) -> Result<Self, ModelFailure> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ModelFailure::resource(format!("failed to spawn model process '{}': {}", config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ModelFailure::resource("model process has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ModelFailure::resource("model process has no stdout"))?;

        // Relay stderr into our log, like any other worker output
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("model stderr: {}", line);
                }
            });
        }

        debug!("Model process spawned with PID {:?}", child.id());

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    /// Send one request and wait for the matching reply.
    ///
    /// Lines that do not decode, and replies whose id does not match (left
    /// over from an exchange abandoned by a timeout), are skipped.
    async fn exchange(&mut self, request: &ModelRequest) -> Result<ModelReply, ModelFailure> {
        let bytes = request
            .to_bytes()
            .map_err(|e| ModelFailure::model(format!("failed to encode request: {}", e)))?;
        let mut frame = hex::encode(&bytes);
        frame.push('\n');

        self.stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| ModelFailure::model(format!("model process write failed: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ModelFailure::model(format!("model process write failed: {}", e)))?;

        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) => {
                    let Ok(bytes) = hex::decode(line.trim()) else {
                        warn!("Skipping undecodable model output line");
                        continue;
                    };
                    let Ok(reply) = ModelReply::from_bytes(&bytes) else {
                        warn!("Skipping malformed model reply frame");
                        continue;
                    };
                    if reply.id != request.id {
                        debug!("Discarding stale model reply {}", reply.id);
                        continue;
                    }
                    return Ok(reply);
                }
                Ok(None) => {
                    return Err(ModelFailure::model("model process closed its output"));
                }
                Err(e) => {
                    return Err(ModelFailure::model(format!(
                        "model process read failed: {}",
                        e
                    )));
                }
            }
        }
    }
}

impl Drop for ModelProcess {
    fn drop(&mut self) {
        // kill_on_drop reaps the child; start_kill avoids leaving it until then
        let _ = self.child.start_kill();
    }
}

/// Pool of external model worker processes.
///
/// The pool is spawned once, by whichever caller arrives first; later callers
/// block on the same initialization and then share it.
pub struct CommandModel {
    config: CommandModelConfig,
    pool: OnceCell<Vec<Mutex<ModelProcess>>>,
    next: AtomicU64,
}

impl CommandModel {
    pub fn new(config: CommandModelConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
            next: AtomicU64::new(0),
        }
    }

    async fn pool(&self) -> Result<&Vec<Mutex<ModelProcess>>, ModelFailure> {
        self.pool
            .get_or_try_init(|| async {
                let count = self.config.processes.max(1);
                let mut processes = Vec::with_capacity(count);
                for index in 0..count {
                    processes.push(Mutex::new(ModelProcess::spawn(&self.config).await?));
                    info!("Model process {}/{} ready", index + 1, count);
                }
                Ok(processes)
            })
            .await
    }
}

#[async_trait]
impl SpeechModel for CommandModel {
    async fn warm(&self) -> Result<(), ModelFailure> {
        self.pool().await.map(|_| ())
    }

    async fn transcribe(&self, request: ModelRequest) -> Result<ModelOutput, ModelFailure> {
        let pool = self.pool().await?;
        let index = self.next.fetch_add(1, Ordering::Relaxed) as usize % pool.len();
        let mut process = pool[index].lock().await;

        match process.exchange(&request).await {
            Ok(reply) => reply.outcome,
            Err(failure) => {
                warn!("Model process {} failed, respawning: {}", index, failure);
                match ModelProcess::spawn(&self.config).await {
                    Ok(fresh) => *process = fresh,
                    Err(e) => warn!("Failed to respawn model process {}: {}", index, e),
                }
                Err(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelProfile;
    use uuid::Uuid;

    #[test]
    fn test_default_config() {
        let config = CommandModelConfig::default();
        assert_eq!(config.command, "uv");
        assert_eq!(config.processes, 2);
    }

    #[test]
    fn test_frame_encoding_round_trip() {
        let request = ModelRequest {
            id: Uuid::new_v4(),
            audio: vec![0.5; 8],
            sample_rate: 16000,
            language_hint: Some("en".to_string()),
            model_profile: ModelProfile::Tiny,
            enable_speaker_labels: false,
        };

        let frame = hex::encode(request.to_bytes().unwrap());
        let decoded = ModelRequest::from_bytes(&hex::decode(&frame).unwrap()).unwrap();
        assert_eq!(decoded.id, request.id);
        assert_eq!(decoded.sample_rate, 16000);
    }

    #[tokio::test]
    async fn test_unspawnable_command_is_resource_failure() {
        let model = CommandModel::new(CommandModelConfig {
            command: "definitely-not-a-real-binary".to_string(),
            args: vec![],
            processes: 1,
            ..CommandModelConfig::default()
        });

        let result = model.warm().await;
        assert!(matches!(result, Err(ModelFailure::Resource { .. })));
    }
}
