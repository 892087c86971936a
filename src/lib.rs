pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod params;
pub mod supervisor;
pub mod worker;

pub use config::AppConfig;
pub use error::{MinerdError, Result};
pub use host::{HostEnvironment, SystemHost};
pub use params::{validate, LaunchParameters, RawParameters, ValidationError};
pub use supervisor::{
    HealthMonitor, HealthProbe, Supervisor, SupervisorExit, SupervisorState, TerminationReason,
};
pub use worker::{
    HealthGauge, ProcessBackend, WorkerBackend, WorkerEvent, WorkerFatalEvent, WorkerHandle,
    WorkerProcess, WorkerStatus,
};
