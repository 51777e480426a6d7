//! Supervisor that keeps a configured set of sibling OS services alive.
//!
//! The process is itself a managed service: the [`lifecycle`] controller speaks the host's
//! service-control protocol while the [`engine`] polls the watched services on a fixed cadence
//! and asks the host to start any that have stopped.

pub mod cancel;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod oracle;
pub mod signals;

pub use cancel::CancellationSignal;
pub use config::{ConfigStore, ConfigValue, MemoryStore, MonitorConfig, ServiceName};
pub use engine::{CycleReport, MonitorEngine, MonitorExit, MonitorHandle};
pub use error::{ConfigError, LifecycleError, QueryError, ReportError, StartError, SupervisorError};
pub use lifecycle::{
    ControlRequest, LifecycleController, LifecycleEvent, LifecycleState, NullReporter, StatusReporter,
    StopOutcome,
};
pub use oracle::{ServiceOracle, ServiceStatus};
