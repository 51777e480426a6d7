//! Host service-manager bindings - delegates to OS-native service managers
//!
//! Provides a unified interface for the command verbs and for the [`ServiceOracle`] the
//! monitor polls through:
//! - Linux: systemd (systemctl)
//! - Windows: Service Control Manager (Windows API)
//!
//! [`ServiceOracle`]: crate::oracle::ServiceOracle

use std::path::Path;

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use log::{LevelFilter, info, warn};

use crate::config::{self, ConfigStore, ServiceName};
use crate::lifecycle::{LifecycleController, NullReporter, StatusReporter};
use crate::logging;
use crate::oracle::ServiceOracle;
use crate::signals;

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux_control;
        mod linux_unit;
        use linux_control as platform;
    } else if #[cfg(target_os = "windows")] {
        mod windows_control;
        mod windows_service_host;
        use windows_control as platform;
    } else {
        mod unsupported_control;
        use unsupported_control as platform;
    }
}

pub use platform::HostServices;

/// Register this executable as a managed service called `name`
pub fn install(name: &ServiceName, config: Option<&Path>) -> Result<()> {
    platform::install(name, config)
}

/// Unregister service `name`, stopping it first if needed
pub fn delete(name: &ServiceName) -> Result<()> {
    platform::delete(name)
}

/// Ask the host to start service `name`
pub fn start(name: &ServiceName) -> Result<()> {
    platform::start(name)
}

/// Ask the host to stop service `name`
pub fn stop(name: &ServiceName) -> Result<()> {
    platform::stop(name)
}

/// Console mode: supervise until interrupted, with no host listening for status reports
pub fn run_console(name: &ServiceName, config: Option<&Path>) -> Result<()> {
    let store = config::open_store(name, config);
    let oracle = HostServices::connect()?;
    run_with_interrupts(name, store.as_ref(), oracle, NullReporter)
}

/// Drive a [`LifecycleController`] whose stop requests come from process signals
fn run_with_interrupts<O, R>(
    name: &ServiceName,
    store: &dyn ConfigStore,
    oracle: O,
    reporter: R,
) -> Result<()>
where
    O: ServiceOracle + Send + 'static,
    R: StatusReporter,
{
    signals::install_handlers()?;
    let (tx, rx) = unbounded();
    signals::forward_to(tx).context("Failed to start interrupt forwarder")?;

    info!("{name} supervising from {} (pid {})", store.location(), std::process::id());
    let mut controller = LifecycleController::new(reporter);
    let outcome = controller.run(store, oracle, &rx)?;
    info!("{name} stopped after {:?}", outcome.request);
    Ok(())
}

/// Run the lifecycle controller under the host's service manager
///
/// Only meaningful when the host launched the process; blocks until the service stops.
pub fn run_service(name: &ServiceName, config: Option<&Path>) -> Result<()> {
    let store = config::open_store(name, config);
    init_service_logging(store.as_ref());
    platform::run_service(name, config)
}

fn init_service_logging(store: &dyn ConfigStore) {
    match config::load_log_settings(store) {
        Ok(settings) => logging::init_service(settings.as_ref()),
        Err(e) => {
            logging::init_stderr(LevelFilter::Info);
            warn!("ignoring log settings: {e}");
        }
    }
}
