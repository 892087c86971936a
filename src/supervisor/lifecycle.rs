//! Worker supervision state machine
//!
//! `Starting → Running → (Restarting → Running)* → Terminated`
//!
//! The supervisor is the only owner of the live worker. It validates the
//! launch values, creates the worker, and starts the health monitor. A
//! sustained zero hashrate tears the worker down and runs the whole start
//! sequence again; a fatal worker event tears it down for good and leaves the
//! supervisor reporting the reason until the process is asked to stop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::monitor::HealthMonitor;
use crate::config::SupervisorConfig;
use crate::host::HostEnvironment;
use crate::params::{validate, RawParameters, ValidationError};
use crate::worker::{
    event_channel, HealthGauge, WorkerBackend, WorkerEvent, WorkerEventStream, WorkerFatalEvent,
    WorkerHandle,
};

/// Why the supervisor stopped running workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    Validation(ValidationError),
    Fatal(WorkerFatalEvent),
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Validation(e) => write!(f, "{}", e),
            TerminationReason::Fatal(e) => write!(f, "{}", e),
        }
    }
}

/// Supervisor lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    /// Validating parameters and creating the first worker
    Starting,
    /// A worker has been created and is being monitored
    Running,
    /// Tearing down an unproductive worker before recreating it
    Restarting,
    /// No worker will be created again
    Terminated(TerminationReason),
}

impl SupervisorState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SupervisorState::Terminated(_))
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Restarting => write!(f, "restarting"),
            SupervisorState::Terminated(_) => write!(f, "terminated"),
        }
    }
}

/// How [`Supervisor::run`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Shutdown was requested while workers were being supervised
    Shutdown,
    /// Shutdown was requested after the supervisor had terminated
    Terminated(TerminationReason),
}

/// Owns the worker lifecycle
pub struct Supervisor {
    config: SupervisorConfig,
    raw: RawParameters,
    host: Arc<dyn HostEnvironment>,
    backend: Arc<dyn WorkerBackend>,
    monitor: HealthMonitor,
    worker: Option<WorkerHandle>,
    events: Option<WorkerEventStream>,
    generation: u64,
    restarts: u64,
    streak_tx: mpsc::UnboundedSender<u64>,
    streak_rx: mpsc::UnboundedReceiver<u64>,
    state_tx: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        raw: RawParameters,
        host: Arc<dyn HostEnvironment>,
        backend: Arc<dyn WorkerBackend>,
    ) -> Self {
        let (streak_tx, streak_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SupervisorState::Starting);
        Self {
            monitor: HealthMonitor::new(&config),
            config,
            raw,
            host,
            backend,
            worker: None,
            events: None,
            generation: 0,
            restarts: 0,
            streak_tx,
            streak_rx,
            state_tx,
        }
    }

    /// Watch lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        self.state_tx.borrow().clone()
    }

    /// Supervise workers until `shutdown` resolves.
    ///
    /// Once terminated the supervisor keeps logging the reason every
    /// `report_interval` instead of returning, so a process manager sees a
    /// live but failing process rather than respawning a broken setup.
    pub async fn run<S>(mut self, shutdown: S) -> SupervisorExit
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if let Err(reason) = self.start().await {
            return self.report_until_shutdown(reason, shutdown.as_mut()).await;
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping worker");
                    self.teardown().await;
                    return SupervisorExit::Shutdown;
                }
                Some(generation) = self.streak_rx.recv() => {
                    if generation != self.generation {
                        debug!("Ignoring unhealthy streak from worker #{}", generation);
                        continue;
                    }
                    warn!("Restart because of zero hashrate");
                    if let Err(reason) = self.restart().await {
                        return self.report_until_shutdown(reason, shutdown.as_mut()).await;
                    }
                }
                event = next_event(&mut self.events) => match event {
                    Some(WorkerEvent::Fatal(fatal)) => {
                        error!("Worker #{} reported a fatal condition: {}", self.generation, fatal);
                        self.teardown().await;
                        return self
                            .report_until_shutdown(TerminationReason::Fatal(fatal), shutdown.as_mut())
                            .await;
                    }
                    Some(WorkerEvent::Exited { code }) => {
                        warn!("Worker #{} exited on its own (code: {:?})", self.generation, code);
                    }
                    None => self.events = None,
                },
            }
        }
    }

    /// Validate, create a worker and start monitoring it
    async fn start(&mut self) -> Result<(), TerminationReason> {
        let params =
            validate(&self.raw, self.host.as_ref()).map_err(TerminationReason::Validation)?;

        self.generation += 1;
        let generation = self.generation;
        let (events_tx, events_rx) = event_channel();

        let gauge = match WorkerHandle::create(self.backend.as_ref(), params, generation, events_tx)
            .await
        {
            Ok(worker) => {
                let gauge = worker.gauge();
                self.worker = Some(worker);
                gauge
            }
            Err(e) => {
                // Monitored as a zero-hashrate worker, so the next streak retries
                error!("Failed to create worker #{}: {}", generation, e);
                HealthGauge::new()
            }
        };
        self.events = Some(events_rx);

        let streak_tx = self.streak_tx.clone();
        self.monitor.start(gauge, move || {
            let _ = streak_tx.send(generation);
        });

        self.set_state(SupervisorState::Running);
        Ok(())
    }

    /// Replace the current worker with a freshly validated one
    async fn restart(&mut self) -> Result<(), TerminationReason> {
        self.set_state(SupervisorState::Restarting);
        self.monitor.stop();
        self.stop_worker().await;

        // A fatal signal the outgoing worker raised before it went down still counts
        if let Some(fatal) = self.drain_fatal_event() {
            error!("Worker #{} reported a fatal condition: {}", self.generation, fatal);
            return Err(TerminationReason::Fatal(fatal));
        }

        self.restarts += 1;
        info!("Restarting worker (restart #{})", self.restarts);
        self.start().await
    }

    /// Stop monitoring and the worker for good
    async fn teardown(&mut self) {
        self.monitor.stop();
        self.stop_worker().await;
        self.events = None;
    }

    async fn stop_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            if let Err(e) = worker.terminate().await {
                warn!("Worker #{} did not stop cleanly: {}", worker.generation(), e);
            }
        }
    }

    /// Drop the current event subscription, returning any fatal event still queued
    fn drain_fatal_event(&mut self) -> Option<WorkerFatalEvent> {
        let mut events = self.events.take()?;
        while let Ok(event) = events.try_recv() {
            if let WorkerEvent::Fatal(fatal) = event {
                return Some(fatal);
            }
        }
        None
    }

    async fn report_until_shutdown<S>(
        &mut self,
        reason: TerminationReason,
        mut shutdown: Pin<&mut S>,
    ) -> SupervisorExit
    where
        S: Future<Output = ()>,
    {
        self.set_state(SupervisorState::Terminated(reason.clone()));

        let mut ticker = tokio::time::interval(self.config.report_interval());
        loop {
            tokio::select! {
                _ = &mut shutdown => return SupervisorExit::Terminated(reason),
                _ = ticker.tick() => error!("{}", reason),
            }
        }
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state_tx.send_replace(state.clone());
        if previous != state {
            info!("Supervisor state: {} -> {}", previous, state);
        }
    }
}

async fn next_event(events: &mut Option<WorkerEventStream>) -> Option<WorkerEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
