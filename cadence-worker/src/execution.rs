//! Execution service
//!
//! Runs one dispatched artifact as a subprocess:
//! - Stages the artifact into a scoped temporary file
//! - Spawns `<runtime program> <runtime args> <artifact> [arguments...]`
//! - Collects stdout and stderr, line by line, into a single output
//! - Kills the process when the execution timeout is exceeded
//!
//! Failures never escape as errors; they are classified into the returned
//! [`ExecutionResult`].

use async_trait::async_trait;
use cadence_core::artifact::ArtifactStore;
use cadence_core::domain::execution::{ExecutionResult, FailureReason};
use cadence_core::dto::message::DispatchMessage;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::staging::StagedArtifact;

/// Service trait for executing dispatched jobs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes the artifact named by `dispatch` and reports the outcome
    async fn execute(&self, dispatch: &DispatchMessage) -> ExecutionResult;
}

/// Subprocess based implementation of ExecutionService
pub struct ProcessExecutionService {
    artifacts: Arc<dyn ArtifactStore>,
    config: WorkerConfig,
}

impl ProcessExecutionService {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, config: WorkerConfig) -> Self {
        Self { artifacts, config }
    }

    async fn run(
        &self,
        staged: &StagedArtifact,
        dispatch: &DispatchMessage,
        started: Instant,
    ) -> ExecutionResult {
        let mut cmd = Command::new(&self.config.runtime_program);
        cmd.args(&self.config.runtime_args)
            .arg(staged.path())
            .args(&dispatch.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(job_id = %dispatch.job_id, "Failed to start process: {}", e);
                return ExecutionResult::failed(
                    FailureReason::ProcessStart {
                        reason: format!("failed to start {}: {}", self.config.runtime_program, e),
                    },
                    String::new(),
                    elapsed_ms(started),
                );
            }
        };

        let output = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(collect_lines(stdout, Arc::clone(&output))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(collect_lines(stderr, Arc::clone(&output))));
        }

        let limit = self.config.execution_timeout;
        let waited = tokio::time::timeout(limit, child.wait()).await;

        let status = match waited {
            Ok(Ok(status)) => {
                for reader in readers {
                    let _ = reader.await;
                }
                status
            }
            Ok(Err(e)) => {
                for reader in &readers {
                    reader.abort();
                }
                let output = output.lock().await.clone();
                return ExecutionResult::failed(
                    FailureReason::ProcessStart {
                        reason: format!("failed to wait for process: {}", e),
                    },
                    output,
                    elapsed_ms(started),
                );
            }
            Err(_) => {
                warn!(
                    job_id = %dispatch.job_id,
                    "Process exceeded {:?}, killing it", limit
                );
                if let Err(e) = child.kill().await {
                    warn!(job_id = %dispatch.job_id, "Failed to kill process: {}", e);
                }
                // Descendants may still hold the pipes open
                for reader in &readers {
                    reader.abort();
                }
                let output = output.lock().await.clone();
                return ExecutionResult::failed(
                    FailureReason::Timeout {
                        after_secs: limit.as_secs(),
                    },
                    output,
                    elapsed_ms(started),
                );
            }
        };

        let output = output.lock().await.clone();
        let duration_ms = elapsed_ms(started);

        match status.code() {
            Some(0) => ExecutionResult::completed(output, duration_ms),
            Some(code) => {
                ExecutionResult::failed(FailureReason::NonZeroExit { code }, output, duration_ms)
            }
            // Terminated by a signal
            None => ExecutionResult::failed(
                FailureReason::NonZeroExit { code: -1 },
                output,
                duration_ms,
            ),
        }
    }
}

#[async_trait]
impl ExecutionService for ProcessExecutionService {
    async fn execute(&self, dispatch: &DispatchMessage) -> ExecutionResult {
        let started = Instant::now();

        info!(
            job_id = %dispatch.job_id,
            "Executing artifact {}", dispatch.artifact_name
        );

        let staged = match StagedArtifact::fetch(
            self.artifacts.as_ref(),
            &dispatch.artifact_name,
            &self.config.staging_dir,
        )
        .await
        {
            Ok(staged) => staged,
            Err(e) => {
                warn!(job_id = %dispatch.job_id, "Failed to fetch artifact: {}", e);
                return ExecutionResult::failed(
                    FailureReason::ArtifactFetch {
                        reason: e.to_string(),
                    },
                    String::new(),
                    elapsed_ms(started),
                );
            }
        };

        let result = self.run(&staged, dispatch, started).await;
        drop(staged);

        info!(
            job_id = %dispatch.job_id,
            success = result.success,
            duration_ms = result.duration_ms,
            "{}", result.message
        );

        result
    }
}

/// Appends every line of `stream` to `output`
async fn collect_lines(stream: impl AsyncRead + Unpin, output: Arc<Mutex<String>>) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let mut output = output.lock().await;
                output.push_str(text.trim_end_matches(['\n', '\r']));
                output.push('\n');
            }
            Err(e) => {
                debug!("Stopped reading process output: {}", e);
                break;
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
