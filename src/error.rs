//! Error taxonomy of the supervisor.
//!
//! Configuration and lifecycle errors are startup-fatal. Query and start errors are transient
//! and only ever reported per cycle. Report errors are host-protocol failures and best-effort.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::{LifecycleEvent, LifecycleState};

/// Failure to resolve the monitoring parameters from persisted configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration value {key} is missing")]
    MissingRequiredKey { key: &'static str },

    #[error("configuration value {key} is malformed: {reason}")]
    MalformedValue { key: &'static str, reason: String },

    #[error("failed to read configuration from {location}: {reason}")]
    Store { location: String, reason: String },
}

/// A status query against the host's service manager failed.
///
/// The monitoring engine treats every variant as an `Unknown` observation.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("service {service} does not exist")]
    NotFound { service: String },

    #[error("status query for {service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("failed to query status of {service}: {reason}")]
    Host { service: String, reason: String },
}

/// The host refused or failed to accept a start request.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("service {service} does not exist")]
    NotFound { service: String },

    #[error("failed to request start of {service}: {reason}")]
    Host { service: String, reason: String },
}

/// A lifecycle transition could not be reported to the host.
#[derive(Debug, Error)]
#[error("failed to report {state} to the host: {reason}")]
pub struct ReportError {
    pub state: LifecycleState,
    pub reason: String,
}

/// Misuse of the lifecycle state machine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("the monitoring engine has already been launched")]
    AlreadyLaunched,

    #[error("failed to launch the monitoring thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("event {event:?} is not valid in state {state}")]
    InvalidTransition {
        state: LifecycleState,
        event: LifecycleEvent,
    },
}

/// Top-level failure of a supervisor run.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
