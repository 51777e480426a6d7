//! Managed-service mode under the Windows Service Control Manager.
//!
//! The dispatcher calls back into [`service_main`] on its own thread; the launch parameters
//! travel there through a process-wide cell since the callback takes no context.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use log::{error, info, warn};
use once_cell::sync::OnceCell;
use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus,
    ServiceType,
};
use windows_service::service_control_handler::{
    self, ServiceControlHandlerResult, ServiceStatusHandle,
};
use windows_service::{define_windows_service, service_dispatcher};

use super::windows_control::HostServices;
use crate::config::{self, ServiceName};
use crate::error::ReportError;
use crate::lifecycle::{
    ControlRequest, DEFAULT_STOP_GRACE, LifecycleController, LifecycleState, StatusReporter,
};

/// Exit code reported when the supervisor stops because it could not start monitoring.
const SERVICE_SPECIFIC_FAILURE: u32 = 1;

struct Launch {
    name: ServiceName,
    config: Option<PathBuf>,
    failure: Mutex<Option<anyhow::Error>>,
}

static LAUNCH: OnceCell<Launch> = OnceCell::new();

define_windows_service!(ffi_service_main, service_main);

/// Hand the process over to the SCM dispatcher; returns once the service has stopped
pub fn run_service(name: &ServiceName, config: Option<&Path>) -> Result<()> {
    LAUNCH
        .set(Launch {
            name: name.clone(),
            config: config.map(Path::to_path_buf),
            failure: Mutex::new(None),
        })
        .map_err(|_| anyhow::anyhow!("service dispatcher already started"))?;

    service_dispatcher::start(name.as_str(), ffi_service_main)
        .context("Failed to connect to the service dispatcher (not launched by the SCM?)")?;

    let failure = LAUNCH
        .get()
        .and_then(|launch| launch.failure.lock().ok().and_then(|mut slot| slot.take()));
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn service_main(_arguments: Vec<OsString>) {
    let Some(launch) = LAUNCH.get() else {
        return;
    };
    if let Err(e) = run_supervisor(launch) {
        error!("{e:#}");
        if let Ok(mut slot) = launch.failure.lock() {
            *slot = Some(e);
        }
    }
}

fn run_supervisor(launch: &Launch) -> Result<()> {
    let (tx, rx) = unbounded();
    let handle = service_control_handler::register(launch.name.as_str(), move |control| {
        let request = match control {
            ServiceControl::Stop => ControlRequest::Stop,
            ServiceControl::Shutdown | ServiceControl::Preshutdown => ControlRequest::Shutdown,
            ServiceControl::Interrogate => return ServiceControlHandlerResult::NoError,
            _ => return ServiceControlHandlerResult::NotImplemented,
        };
        if tx.send(request).is_err() {
            warn!("dropping {request:?}: supervisor already stopping");
        }
        ServiceControlHandlerResult::NoError
    })
    .context("Failed to register service control handler")?;

    let reporter = ScmReporter::new(handle);
    let store = config::open_store(&launch.name, launch.config.as_deref());
    let oracle = match HostServices::connect() {
        Ok(oracle) => oracle,
        Err(e) => {
            reporter.report_failure();
            return Err(e);
        }
    };

    info!("{} starting under the SCM (pid {})", launch.name, std::process::id());
    let mut controller = LifecycleController::new(&reporter);
    match controller.run(store.as_ref(), oracle, &rx) {
        Ok(outcome) => {
            info!("stopped after {:?}", outcome.request);
            Ok(())
        }
        Err(e) => {
            // Still in StartPending; the SCM needs to see a terminal state.
            reporter.report_failure();
            Err(e.into())
        }
    }
}

/// Reports lifecycle transitions through `SetServiceStatus`
struct ScmReporter {
    handle: ServiceStatusHandle,
    checkpoint: AtomicU32,
}

impl ScmReporter {
    fn new(handle: ServiceStatusHandle) -> Self {
        Self {
            handle,
            checkpoint: AtomicU32::new(0),
        }
    }

    fn status(&self, state: ServiceState, wait_hint: Duration) -> ServiceStatus {
        let pending = matches!(state, ServiceState::StartPending | ServiceState::StopPending);
        let checkpoint = if pending {
            self.checkpoint.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            0
        };
        let controls_accepted = if state == ServiceState::Running {
            ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN
        } else {
            ServiceControlAccept::empty()
        };

        ServiceStatus {
            service_type: ServiceType::OWN_PROCESS,
            current_state: state,
            controls_accepted,
            exit_code: ServiceExitCode::Win32(0),
            checkpoint,
            wait_hint,
            process_id: None,
        }
    }

    fn report_failure(&self) {
        let mut status = self.status(ServiceState::Stopped, Duration::ZERO);
        status.exit_code = ServiceExitCode::ServiceSpecific(SERVICE_SPECIFIC_FAILURE);
        if let Err(e) = self.handle.set_service_status(status) {
            warn!("failed to report stopped state: {e}");
        }
    }
}

impl StatusReporter for ScmReporter {
    fn report(&self, state: LifecycleState) -> Result<(), ReportError> {
        let (scm_state, wait_hint) = match state {
            LifecycleState::Initializing => return Ok(()),
            LifecycleState::StartPending => (ServiceState::StartPending, Duration::from_secs(5)),
            LifecycleState::Running => (ServiceState::Running, Duration::ZERO),
            LifecycleState::StopPending => (ServiceState::StopPending, DEFAULT_STOP_GRACE),
            LifecycleState::Stopped => (ServiceState::Stopped, Duration::ZERO),
        };
        self.handle
            .set_service_status(self.status(scm_state, wait_hint))
            .map_err(|e| ReportError {
                state,
                reason: e.to_string(),
            })
    }
}
