//! External miner executable as a worker
//!
//! The miner runs as a child process and reports on stdout, one JSON object
//! per line:
//!
//! ```text
//! {"type":"hashrate","value":1532.7}
//! {"type":"client_old"}
//! {"type":"parameter_fail"}
//! ```
//!
//! Any other stdout line is logged at debug level; stderr is forwarded as
//! warnings.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    HealthGauge, WorkerBackend, WorkerEvent, WorkerEventSink, WorkerFatalEvent, WorkerProcess,
};
use crate::config::WorkerConfig;
use crate::error::{MinerdError, Result};
use crate::params::LaunchParameters;

/// Status line emitted by the miner
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WorkerMessage {
    Hashrate { value: f64 },
    ClientOld,
    ParameterFail,
}

/// Launches the configured miner executable
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    config: WorkerConfig,
}

impl ProcessBackend {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }
}

/// Command line the miner receives for `params`
fn launch_args(params: &LaunchParameters) -> Vec<String> {
    let mut args = Vec::with_capacity(5);
    if let Some(server) = params.server() {
        args.push(format!("--server={}", server));
    }
    args.push(format!("--address={}", params.address()));
    args.push(format!("--name={}", params.name()));
    args.push(format!("--thread={}", params.thread()));
    args.push(format!("--percent={}", params.percent()));
    args
}

#[async_trait]
impl WorkerBackend for ProcessBackend {
    async fn spawn(
        &self,
        params: &LaunchParameters,
        gauge: HealthGauge,
        events: WorkerEventSink,
    ) -> Result<Box<dyn WorkerProcess>> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .args(launch_args(params))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start worker command `{}`", self.config.command))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MinerdError::WorkerSpawn("worker stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MinerdError::WorkerSpawn("worker stderr not captured".to_string()))?;

        debug!("Worker process spawned (pid: {:?})", child.id());

        let readers = vec![
            tokio::spawn(read_status(stdout, gauge, events)),
            tokio::spawn(forward_stderr(stderr)),
        ];

        Ok(Box::new(ProcessWorker {
            child,
            readers,
            grace: Duration::from_secs(self.config.shutdown_grace_secs),
        }))
    }
}

/// Apply miner status lines until stdout closes
async fn read_status(stdout: ChildStdout, gauge: HealthGauge, events: WorkerEventSink) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<WorkerMessage>(&line) {
                Ok(WorkerMessage::Hashrate { value }) => gauge.set(value),
                Ok(WorkerMessage::ClientOld) => {
                    let _ = events
                        .send(WorkerEvent::Fatal(WorkerFatalEvent::ProtocolStale))
                        .await;
                }
                Ok(WorkerMessage::ParameterFail) => {
                    let _ = events
                        .send(WorkerEvent::Fatal(WorkerFatalEvent::ParametersRejected))
                        .await;
                }
                Err(_) => debug!(target: "minerd::worker", "{}", line),
            },
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read worker output: {}", e);
                break;
            }
        }
    }

    // A silent worker is an unproductive one
    gauge.set(0.0);
    let _ = events.send(WorkerEvent::Exited { code: None }).await;
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(target: "minerd::worker", "{}", line);
    }
}

/// A running miner child process
pub struct ProcessWorker {
    child: Child,
    readers: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl ProcessWorker {
    /// Ask the child to exit
    fn request_stop(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!("Failed to send SIGTERM to worker {}: {}", pid, e);
                    self.child.start_kill()?;
                }
            }
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()?;
        }

        Ok(())
    }
}

#[async_trait]
impl WorkerProcess for ProcessWorker {
    async fn shutdown(&mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!("Worker process already exited: {}", status);
        } else {
            self.request_stop()?;

            match tokio::time::timeout(self.grace, self.child.wait()).await {
                Ok(status) => info!("Worker process exited: {}", status?),
                Err(_) => {
                    warn!(
                        "Worker process did not exit within {}s, killing",
                        self.grace.as_secs()
                    );
                    self.child.kill().await?;
                }
            }
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        Ok(())
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
