//! Worker boundary
//!
//! The mining worker itself is an external collaborator. This module defines
//! the seam the supervisor talks through:
//! - [`WorkerBackend`] starts a worker for a set of launch parameters
//! - [`WorkerProcess`] is one running worker that can be shut down
//! - [`HealthGauge`] carries the worker's latest hashrate to the monitor
//! - [`WorkerEvent`] is the typed event stream a worker reports on
//! - [`WorkerHandle`] owns one instance for the supervisor

pub mod process;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::params::LaunchParameters;
use crate::supervisor::HealthProbe;

pub use process::{ProcessBackend, ProcessWorker};

/// Capacity of a worker's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Conditions a restart cannot fix
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerFatalEvent {
    /// Client and server protocol versions do not match
    #[error("client version out of date, please download the latest mining client")]
    ProtocolStale,
    /// The server refused the submitted launch parameters
    #[error("parameters incorrect, please update parameters and restart the client")]
    ParametersRejected,
}

/// Lifecycle signal emitted by a worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Unrecoverable; the supervisor stops for good
    Fatal(WorkerFatalEvent),
    /// The worker stopped on its own; recovery is left to the health monitor
    Exited { code: Option<i32> },
}

/// Sending half handed to a worker for its events
pub type WorkerEventSink = mpsc::Sender<WorkerEvent>;

/// Receiving half held by the supervisor, one per worker instance
pub type WorkerEventStream = mpsc::Receiver<WorkerEvent>;

/// Create the event channel for a new worker instance
pub fn event_channel() -> (WorkerEventSink, WorkerEventStream) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Latest productivity reading of a worker (hashes per second)
///
/// Cloning shares the underlying cell: the worker writes, the monitor reads.
#[derive(Debug, Clone, Default)]
pub struct HealthGauge(Arc<AtomicU64>);

impl HealthGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading; negative and NaN readings count as zero
    pub fn set(&self, value: f64) {
        let value = if value.is_nan() { 0.0 } else { value.max(0.0) };
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl HealthProbe for HealthGauge {
    fn current_health_metric(&self) -> f64 {
        self.get()
    }
}

/// Starts workers
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Start a worker for `params`.
    ///
    /// The worker keeps `gauge` updated with its hashrate and reports
    /// lifecycle signals on `events`. Returns once the worker has been
    /// launched; it must not wait for the worker to become productive.
    async fn spawn(
        &self,
        params: &LaunchParameters,
        gauge: HealthGauge,
        events: WorkerEventSink,
    ) -> Result<Box<dyn WorkerProcess>>;
}

/// A running worker
#[async_trait]
pub trait WorkerProcess: Send {
    /// Stop the worker and release its resources
    async fn shutdown(&mut self) -> Result<()>;
}

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// The supervisor's handle on one worker instance
pub struct WorkerHandle {
    generation: u64,
    params: LaunchParameters,
    gauge: HealthGauge,
    process: Option<Box<dyn WorkerProcess>>,
    started_at: DateTime<Utc>,
}

impl WorkerHandle {
    /// Start a worker through `backend`
    ///
    /// # Arguments
    /// * `backend` - collaborator that launches the worker
    /// * `params` - validated launch parameters
    /// * `generation` - instance number, increasing across restarts
    /// * `events` - sink for this instance's lifecycle signals
    pub async fn create(
        backend: &dyn WorkerBackend,
        params: LaunchParameters,
        generation: u64,
        events: WorkerEventSink,
    ) -> Result<Self> {
        let gauge = HealthGauge::new();
        let process = backend.spawn(&params, gauge.clone(), events).await?;

        info!(
            "Worker #{} started: name={}, thread={}, percent={}",
            generation,
            params.name(),
            params.thread(),
            params.percent()
        );

        Ok(Self {
            generation,
            params,
            gauge,
            process: Some(process),
            started_at: Utc::now(),
        })
    }

    /// Most recent hashrate reading; the last known value while reconnecting
    pub fn current_health_metric(&self) -> f64 {
        self.gauge.get()
    }

    /// Shared gauge for the health monitor
    pub fn gauge(&self) -> HealthGauge {
        self.gauge.clone()
    }

    pub fn params(&self) -> &LaunchParameters {
        &self.params
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> WorkerStatus {
        if self.process.is_some() {
            WorkerStatus::Running
        } else {
            WorkerStatus::Stopped
        }
    }

    /// Shut the worker down. Calling this again is a no-op.
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            debug!("Worker #{} already stopped", self.generation);
            return Ok(());
        };

        let uptime = Utc::now().signed_duration_since(self.started_at);
        info!(
            "Stopping worker #{} after {}s",
            self.generation,
            uptime.num_seconds()
        );

        if let Err(e) = process.shutdown().await {
            warn!("Worker #{} shutdown reported an error: {}", self.generation, e);
            return Err(e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("generation", &self.generation)
            .field("params", &self.params)
            .field("status", &self.status())
            .field("hashrate", &self.gauge.get())
            .finish()
    }
}
