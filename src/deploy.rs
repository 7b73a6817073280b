//! Deployment dispatcher
//!
//! Runs the configured deployment script out-of-band. At most one run is in
//! flight at a time; deliveries that arrive meanwhile are folded into a single
//! trailing run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::DeployConfig;
use crate::error::DeployError;

/// Maximum size for captured output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Captured result of a finished deployment command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Something that can execute the deployment command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, deploy: &DeployConfig) -> Result<CommandOutput, DeployError>;
}

/// Runs the script through `sh -c`, bounded by the configured timeout.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, deploy: &DeployConfig) -> Result<CommandOutput, DeployError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&deploy.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The script's own children (git, docker) join this group so a timeout
        // can stop all of them, not just `sh`.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &deploy.working_dir {
            cmd.current_dir(dir);
        }

        match &deploy.working_dir {
            Some(dir) => info!("Running (cwd = '{}'): {}", dir.display(), deploy.script),
            None => info!("Running: {}", deploy.script),
        }

        let mut child = cmd.spawn().map_err(DeployError::Spawn)?;
        let stdout_task = child.stdout.take().map(read_pipe);
        let stderr_task = child.stderr.take().map(read_pipe);

        let finished = tokio::time::timeout(deploy.timeout(), async {
            let status = child.wait().await?;
            let stdout = collect_pipe(stdout_task).await;
            let stderr = collect_pipe(stderr_task).await;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(result) => result.map_err(DeployError::Spawn)?,
            Err(_) => {
                kill_process_group(&mut child).await;
                return Err(DeployError::TimedOut(deploy.timeout()));
            }
        };

        let captured = CommandOutput {
            exit_code: status.code(),
            stdout: truncate_output(String::from_utf8_lossy(&stdout).into_owned()),
            stderr: truncate_output(String::from_utf8_lossy(&stderr).into_owned()),
        };

        if status.success() {
            Ok(captured)
        } else {
            Err(DeployError::Failed {
                code: captured.exit_code,
                stderr: captured.stderr,
            })
        }
    }
}

fn read_pipe<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            warn!("Failed to read deployment output: {}", e);
        }
        buf
    })
}

async fn collect_pipe(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// SIGKILL the whole process group led by `child`, then reap it.
#[cfg(unix)]
async fn kill_process_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            warn!(
                "Failed to kill process group {}: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }
    if let Err(e) = child.kill().await {
        debug!("Deployment command already gone: {}", e);
    }
}

#[cfg(not(unix))]
async fn kill_process_group(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill deployment command: {}", e);
    }
}

fn truncate_output(mut output: String) -> String {
    if output.len() > MAX_OUTPUT_SIZE {
        let mut cut = MAX_OUTPUT_SIZE;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        output.push_str("\n... (output truncated)");
    }
    output
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Success,
    Failed,
    TimedOut,
}

/// Transient record of a single run, kept only for logging.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: String,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn start() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            status: DeploymentStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn finish(&mut self, result: &Result<CommandOutput, DeployError>) {
        self.status = match result {
            Ok(_) => DeploymentStatus::Success,
            Err(DeployError::TimedOut(_)) => DeploymentStatus::TimedOut,
            Err(_) => DeploymentStatus::Failed,
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> i64 {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or(0)
    }
}

/// What `Dispatcher::trigger` did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was running; a run has been started.
    Started,
    /// A run is in flight; one more will follow it.
    Queued,
    /// A run is in flight and one is already queued; this delivery joins it.
    Coalesced,
}

#[derive(Debug, Default)]
struct DispatchState {
    running: bool,
    pending: bool,
}

/// Single-flight, fire-and-forget deployment trigger.
pub struct Dispatcher {
    runner: Arc<dyn CommandRunner>,
    deploy: DeployConfig,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn CommandRunner>, deploy: DeployConfig) -> Arc<Self> {
        Arc::new(Self {
            runner,
            deploy,
            state: Mutex::new(DispatchState::default()),
        })
    }

    /// Request a deployment. Returns as soon as the request has been recorded;
    /// the command itself runs on a background task.
    pub async fn trigger(self: &Arc<Self>) -> DispatchOutcome {
        let mut state = self.state.lock().await;
        if state.running {
            if state.pending {
                info!("Deployment already queued; coalescing this request");
                return DispatchOutcome::Coalesced;
            }
            state.pending = true;
            info!("Deployment in progress; queued one more run");
            return DispatchOutcome::Queued;
        }
        state.running = true;
        drop(state);

        let dispatcher = Arc::clone(self);
        tokio::spawn(dispatcher.drain());
        DispatchOutcome::Started
    }

    /// Returns true while a run is in flight or queued.
    pub async fn is_busy(&self) -> bool {
        let state = self.state.lock().await;
        state.running || state.pending
    }

    async fn drain(self: Arc<Self>) {
        loop {
            // A panicking runner must not leave `running` set forever.
            let dispatcher = Arc::clone(&self);
            if let Err(e) = tokio::spawn(async move { dispatcher.run_once().await }).await {
                error!("Deployment task aborted: {}", e);
            }

            let mut state = self.state.lock().await;
            if state.pending {
                state.pending = false;
                info!("Starting queued deployment");
                continue;
            }
            state.running = false;
            break;
        }
    }

    async fn run_once(&self) {
        let mut deployment = Deployment::start();
        let span = info_span!("deployment", id = %deployment.id);

        async {
            info!("Starting deployment...");
            let result = self.runner.run(&self.deploy).await;
            deployment.finish(&result);

            match &result {
                Ok(output) => {
                    info!("Deployment output:\n{}", output.stdout);
                    info!(
                        "Deployment completed successfully in {}ms",
                        deployment.duration_ms()
                    );
                }
                Err(DeployError::TimedOut(limit)) => {
                    error!(
                        "Deployment timed out after {}s; command was killed",
                        limit.as_secs()
                    );
                }
                Err(DeployError::Failed { code, stderr }) => {
                    error!("Deployment failed with exit code {:?}", code);
                    if !stderr.is_empty() {
                        error!("{}", stderr);
                    }
                }
                Err(e) => error!("Deployment failed: {}", e),
            }

            if let Ok(record) = serde_json::to_string(&deployment) {
                debug!("Deployment record: {}", record);
            }
            if deployment.status != DeploymentStatus::Success {
                warn!(
                    "Deployment finished as {:?} after {}ms",
                    deployment.status,
                    deployment.duration_ms()
                );
            }
        }
        .instrument(span)
        .await
    }
}
