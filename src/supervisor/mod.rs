//! Worker Supervision
//!
//! This module keeps exactly one mining worker alive:
//! - Health monitor sampling the worker hashrate
//! - Lifecycle state machine that restarts unproductive workers and halts on fatal events

pub mod lifecycle;
pub mod monitor;

pub use lifecycle::{Supervisor, SupervisorExit, SupervisorState, TerminationReason};
pub use monitor::{HealthMonitor, HealthProbe, HealthState};
