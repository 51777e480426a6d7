//! The supervisor's own life as a managed service.
//!
//! [`LifecycleController`] walks `Initializing → StartPending → Running → StopPending → Stopped`,
//! reporting each step to the host through a [`StatusReporter`]. Control requests arrive as
//! messages on a channel; the controller never polls services itself, it only launches,
//! cancels and awaits the monitor thread.

use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{error, info, warn};

use crate::cancel::CancellationSignal;
use crate::config::{ConfigStore, MonitorConfig, load_monitor_config};
use crate::engine::{MonitorEngine, MonitorExit, MonitorHandle};
use crate::error::{LifecycleError, ReportError, SupervisorError};
use crate::oracle::ServiceOracle;

/// How long a stop waits for the monitor thread before reporting `Stopped` anyway.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LifecycleState {
    Initializing,
    StartPending,
    Running,
    StopPending,
    Stopped,
}

impl LifecycleState {
    /// The state `event` leads to, or `None` if the event is not valid here.
    pub fn step(self, event: LifecycleEvent) -> Option<LifecycleState> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        match (self, event) {
            (Initializing, Enter) => Some(StartPending),
            (StartPending, MonitorLaunched) => Some(Running),
            (Running, StopRequested) => Some(StopPending),
            (StopPending, MonitorExited) => Some(Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::StartPending => "start pending",
            Self::Running => "running",
            Self::StopPending => "stop pending",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LifecycleEvent {
    Enter,
    MonitorLaunched,
    StopRequested,
    /// The monitor exited or the grace period ran out.
    MonitorExited,
}

/// Stop-type requests delivered from the host's control callback or an interrupt handler.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ControlRequest {
    Stop,
    Shutdown,
    Interrupt,
}

/// Reports lifecycle transitions to the host.
///
/// Reporting is best-effort: a failed report is logged and the state machine carries on.
pub trait StatusReporter {
    fn report(&self, state: LifecycleState) -> Result<(), ReportError>;
}

/// Reporter for console mode, where no host is listening.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReporter;

impl StatusReporter for NullReporter {
    fn report(&self, _state: LifecycleState) -> Result<(), ReportError> {
        Ok(())
    }
}

impl<R: StatusReporter + ?Sized> StatusReporter for &R {
    fn report(&self, state: LifecycleState) -> Result<(), ReportError> {
        (**self).report(state)
    }
}

/// Result of a completed stop sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StopOutcome {
    pub request: ControlRequest,
    pub monitor: MonitorExit,
}

pub struct LifecycleController<R> {
    reporter: R,
    state: LifecycleState,
    cancel: CancellationSignal,
    monitor: Option<MonitorHandle>,
    launched: bool,
    grace: Duration,
}

impl<R: StatusReporter> LifecycleController<R> {
    pub fn new(reporter: R) -> Self {
        Self {
            reporter,
            state: LifecycleState::Initializing,
            cancel: CancellationSignal::new(),
            monitor: None,
            launched: false,
            grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// The signal handed to the monitor; set exactly once, on the first stop.
    pub fn cancellation(&self) -> CancellationSignal {
        self.cancel.clone()
    }

    fn apply(&mut self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        let next = self
            .state
            .step(event)
            .ok_or(LifecycleError::InvalidTransition {
                state: self.state,
                event,
            })?;
        info!("supervisor {} → {}", self.state, next);
        self.state = next;

        if let Err(e) = self.reporter.report(next) {
            warn!("{e}");
        }
        Ok(())
    }

    /// `Initializing → StartPending`.
    pub fn enter(&mut self) -> Result<(), LifecycleError> {
        self.apply(LifecycleEvent::Enter)
    }

    /// Launches the monitor thread and moves to `Running`. Allowed once per controller.
    pub fn launch<O>(&mut self, config: MonitorConfig, oracle: O) -> Result<(), LifecycleError>
    where
        O: ServiceOracle + Send + 'static,
    {
        if self.launched {
            return Err(LifecycleError::AlreadyLaunched);
        }
        if self.state.step(LifecycleEvent::MonitorLaunched).is_none() {
            return Err(LifecycleError::InvalidTransition {
                state: self.state,
                event: LifecycleEvent::MonitorLaunched,
            });
        }

        let handle = MonitorEngine::new(config, oracle).spawn(self.cancel.clone())?;
        self.monitor = Some(handle);
        self.launched = true;
        self.apply(LifecycleEvent::MonitorLaunched)
    }

    /// `Running → StopPending → Stopped`: cancels the monitor and waits up to the grace period.
    pub fn stop(&mut self, request: ControlRequest) -> Result<StopOutcome, LifecycleError> {
        self.apply(LifecycleEvent::StopRequested)?;
        info!("stop requested ({request:?})");
        self.cancel.cancel();

        let monitor = match self.monitor.take() {
            Some(handle) => handle.join_timeout(self.grace),
            None => MonitorExit::Finished { cycles: 0 },
        };
        match monitor {
            MonitorExit::Finished { .. } => {}
            MonitorExit::Panicked => error!("monitor thread panicked"),
            MonitorExit::TimedOut => warn!(
                "monitor did not exit within {:?}; stopping anyway",
                self.grace
            ),
        }

        self.apply(LifecycleEvent::MonitorExited)?;
        Ok(StopOutcome { request, monitor })
    }

    /// Full supervisor run: enter, load configuration, launch, wait for a stop request, stop.
    ///
    /// A configuration failure returns before `Running` is ever reached and no monitoring
    /// happens. A closed request channel counts as a stop request.
    pub fn run<O>(
        &mut self,
        store: &dyn ConfigStore,
        oracle: O,
        requests: &Receiver<ControlRequest>,
    ) -> Result<StopOutcome, SupervisorError>
    where
        O: ServiceOracle + Send + 'static,
    {
        self.enter()?;

        let config = load_monitor_config(store).map_err(|e| {
            error!("cannot start monitoring with configuration from {}: {e}", store.location());
            e
        })?;
        info!(
            "watching {:?} every {:?} (initial delay {:?})",
            config.watched_services(),
            config.poll_interval(),
            config.initial_delay()
        );

        self.launch(config, oracle)?;

        let request = requests.recv().unwrap_or_else(|_| {
            warn!("control channel closed; stopping");
            ControlRequest::Stop
        });
        Ok(self.stop(request)?)
    }
}
