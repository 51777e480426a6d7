//! Linux service control using systemd (systemctl)

use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info};

use super::linux_unit::{Scope, UnitSpec, unit_file_name, write_unit};
use crate::config::{self, ServiceName};
use crate::error::{QueryError, ReportError, StartError};
use crate::lifecycle::{LifecycleState, StatusReporter};
use crate::oracle::{ServiceOracle, ServiceStatus};

/// Upper bound on a single systemctl invocation made by the monitor.
const SYSTEMCTL_TIMEOUT: Duration = Duration::from_secs(5);

fn systemctl(scope: Scope) -> Command {
    let mut command = Command::new("systemctl");
    if scope == Scope::User {
        command.arg("--user");
    }
    command
}

/// Run `command`, killing it if it has not exited within `timeout`
fn output_with_timeout(mut command: Command, timeout: Duration) -> io::Result<Option<Output>> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return child.wait_with_output().map(Some);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Parse `systemctl show -p LoadState -p ActiveState` output
fn parse_show_output(name: &str, stdout: &str) -> Result<ServiceStatus, QueryError> {
    let mut load_state = None;
    let mut active_state = None;
    for line in stdout.lines() {
        match line.split_once('=') {
            Some(("LoadState", value)) => load_state = Some(value.trim()),
            Some(("ActiveState", value)) => active_state = Some(value.trim()),
            _ => {}
        }
    }

    if load_state == Some("not-found") {
        return Err(QueryError::NotFound {
            service: name.to_string(),
        });
    }

    match active_state {
        Some("active" | "reloading") => Ok(ServiceStatus::Running),
        Some("inactive" | "failed") => Ok(ServiceStatus::Stopped),
        Some("activating" | "deactivating" | "refreshing" | "maintenance") => {
            Ok(ServiceStatus::Pending)
        }
        Some(other) => Err(QueryError::Host {
            service: name.to_string(),
            reason: format!("unrecognised ActiveState {other:?}"),
        }),
        None => Err(QueryError::Host {
            service: name.to_string(),
            reason: "systemctl reported no ActiveState".to_string(),
        }),
    }
}

/// [`ServiceOracle`] backed by the systemd instance of the current user
#[derive(Clone, Copy, Debug)]
pub struct HostServices {
    scope: Scope,
    timeout: Duration,
}

impl HostServices {
    pub fn connect() -> Result<Self> {
        let scope = Scope::current();
        debug!("using {scope:?} systemd instance");
        Ok(Self {
            scope,
            timeout: SYSTEMCTL_TIMEOUT,
        })
    }
}

impl ServiceOracle for HostServices {
    fn query_status(&self, name: &str) -> Result<ServiceStatus, QueryError> {
        let mut command = systemctl(self.scope);
        command.args(["show", "-p", "LoadState", "-p", "ActiveState", "--", name]);

        let output = output_with_timeout(command, self.timeout)
            .map_err(|e| QueryError::Host {
                service: name.to_string(),
                reason: format!("failed to execute systemctl: {e}"),
            })?
            .ok_or_else(|| QueryError::Timeout {
                service: name.to_string(),
                timeout: self.timeout,
            })?;

        if !output.status.success() {
            return Err(QueryError::Host {
                service: name.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_show_output(name, &String::from_utf8_lossy(&output.stdout))
    }

    fn request_start(&self, name: &str) -> Result<(), StartError> {
        let mut command = systemctl(self.scope);
        command.args(["start", "--no-block", "--", name]);

        let output = output_with_timeout(command, self.timeout)
            .map_err(|e| StartError::Host {
                service: name.to_string(),
                reason: format!("failed to execute systemctl: {e}"),
            })?
            .ok_or_else(|| StartError::Host {
                service: name.to_string(),
                reason: format!("systemctl did not answer within {:?}", self.timeout),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_start_failure(name, reason, self.query_status(name)))
    }
}

/// Turn a failed `systemctl start` into a [`StartError`], using the unit's `LoadState`
/// (as queried into `load_state`) rather than systemctl's localised message to detect a missing unit.
fn classify_start_failure(
    name: &str,
    reason: String,
    load_state: Result<ServiceStatus, QueryError>,
) -> StartError {
    match load_state {
        Err(QueryError::NotFound { .. }) => StartError::NotFound {
            service: name.to_string(),
        },
        _ => StartError::Host {
            service: name.to_string(),
            reason,
        },
    }
}

/// Run a systemctl verb against the supervisor's own unit and fail on non-zero exit
fn systemctl_verb(scope: Scope, args: &[&str]) -> Result<()> {
    let output = systemctl(scope)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute systemctl {}", args.join(" ")))?;

    if !output.status.success() {
        anyhow::bail!(
            "systemctl {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

pub fn install(name: &ServiceName, config: Option<&Path>) -> Result<()> {
    let scope = Scope::current();
    let binary_path = std::env::current_exe().context("Failed to obtain executable path")?;
    let config = config
        .map(fs::canonicalize)
        .transpose()
        .context("Failed to resolve configuration path")?;

    let spec = UnitSpec {
        name,
        binary_path: &binary_path,
        config: config.as_deref(),
        scope,
        notify: cfg!(feature = "systemd-notify"),
    };
    let unit_path = write_unit(&spec, &scope.unit_dir()?)?;
    info!("wrote {}", unit_path.display());

    systemctl_verb(scope, &["daemon-reload"])?;
    systemctl_verb(scope, &["enable", &unit_file_name(name)])?;
    Ok(())
}

pub fn delete(name: &ServiceName) -> Result<()> {
    let scope = Scope::current();
    let unit = unit_file_name(name);
    let oracle = HostServices::connect()?;

    let status = oracle
        .query_status(&unit)
        .with_context(|| format!("Failed to query state of {unit}"))?;
    if status != ServiceStatus::Stopped {
        info!("{unit} is {status}; stopping it first");
        systemctl_verb(scope, &["stop", &unit])?;
    }

    systemctl_verb(scope, &["disable", &unit])?;
    let unit_path = scope.unit_dir()?.join(&unit);
    fs::remove_file(&unit_path)
        .with_context(|| format!("Failed to remove {}", unit_path.display()))?;
    systemctl_verb(scope, &["daemon-reload"])?;
    Ok(())
}

pub fn start(name: &ServiceName) -> Result<()> {
    systemctl_verb(Scope::current(), &["start", &unit_file_name(name)])
}

pub fn stop(name: &ServiceName) -> Result<()> {
    systemctl_verb(Scope::current(), &["stop", &unit_file_name(name)])
}

/// Reports lifecycle transitions through sd_notify
struct SystemdReporter;

impl StatusReporter for SystemdReporter {
    fn report(&self, state: LifecycleState) -> Result<(), ReportError> {
        let message = match state {
            LifecycleState::Initializing => return Ok(()),
            LifecycleState::StartPending => ("STATUS", "starting"),
            LifecycleState::Running => ("READY", "1"),
            LifecycleState::StopPending => ("STOPPING", "1"),
            LifecycleState::Stopped => ("STATUS", "stopped"),
        };
        notify(state, message)
    }
}

#[cfg(feature = "systemd-notify")]
fn notify(state: LifecycleState, message: (&str, &str)) -> Result<(), ReportError> {
    systemd::daemon::notify(false, [message].iter())
        .map(|_| ())
        .map_err(|e| ReportError {
            state,
            reason: e.to_string(),
        })
}

#[cfg(not(feature = "systemd-notify"))]
fn notify(state: LifecycleState, message: (&str, &str)) -> Result<(), ReportError> {
    debug!("{state}: {}={} (sd_notify disabled)", message.0, message.1);
    Ok(())
}

/// Managed-service mode under systemd: SIGTERM is the stop request
pub fn run_service(name: &ServiceName, config: Option<&Path>) -> Result<()> {
    let store = config::open_store(name, config);
    let oracle = HostServices::connect()?;
    super::run_with_interrupts(name, store.as_ref(), oracle, SystemdReporter)
}
