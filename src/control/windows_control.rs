//! Windows service control using Service Control Manager (SCM) API

use std::mem;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use windows::Win32::Foundation::{
    ERROR_SERVICE_ALREADY_RUNNING, ERROR_SERVICE_DOES_NOT_EXIST, WIN32_ERROR,
};
use windows::Win32::System::Registry::{HKEY, HKEY_LOCAL_MACHINE, RegCloseKey, RegCreateKeyW};
use windows::Win32::System::Services::{
    CloseServiceHandle, ControlService, CreateServiceW, DeleteService, OpenSCManagerW,
    OpenServiceW, QueryServiceStatus, SC_HANDLE, SC_MANAGER_CONNECT, SC_MANAGER_CREATE_SERVICE,
    SERVICE_ALL_ACCESS, SERVICE_CONTINUE_PENDING, SERVICE_CONTROL_STOP, SERVICE_DEMAND_START,
    SERVICE_ERROR_NORMAL, SERVICE_PAUSE_PENDING, SERVICE_PAUSED, SERVICE_QUERY_STATUS,
    SERVICE_RUNNING, SERVICE_START, SERVICE_START_PENDING, SERVICE_STATUS,
    SERVICE_STATUS_CURRENT_STATE, SERVICE_STOP, SERVICE_STOP_PENDING, SERVICE_STOPPED,
    SERVICE_WIN32_OWN_PROCESS, StartServiceW,
};
use windows::core::PCWSTR;

use crate::config::ServiceName;
use crate::error::{QueryError, StartError};
use crate::oracle::{ServiceOracle, ServiceStatus};

pub use super::windows_service_host::run_service;

/// RAII wrapper for SC_HANDLE (Service Control Manager handle)
struct ScManagerHandle(SC_HANDLE);

impl ScManagerHandle {
    fn connect(access: u32) -> windows::core::Result<Self> {
        let handle = unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), access) }?;
        Ok(ScManagerHandle(handle))
    }

    fn handle(&self) -> SC_HANDLE {
        self.0
    }
}

impl Drop for ScManagerHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }
}

/// RAII wrapper for SC_HANDLE (Service handle)
struct ServiceHandle(SC_HANDLE);

impl ServiceHandle {
    fn handle(&self) -> SC_HANDLE {
        self.0
    }

    fn state(&self) -> windows::core::Result<SERVICE_STATUS_CURRENT_STATE> {
        let mut status: SERVICE_STATUS = unsafe { mem::zeroed() };
        unsafe { QueryServiceStatus(self.handle(), &mut status) }?;
        Ok(status.dwCurrentState)
    }

    fn start(&self) -> windows::core::Result<()> {
        unsafe { StartServiceW(self.handle(), None) }
    }

    fn stop(&self) -> windows::core::Result<()> {
        let mut status: SERVICE_STATUS = unsafe { mem::zeroed() };
        unsafe { ControlService(self.handle(), SERVICE_CONTROL_STOP, &mut status) }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }
}

/// RAII wrapper for a registry key handle
struct RegistryHandle(HKEY);

impl Drop for RegistryHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = RegCloseKey(self.0);
            }
        }
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

/// Open a service with the specified access rights
fn open_service(
    sc_manager: &ScManagerHandle,
    name: &str,
    access: u32,
) -> windows::core::Result<ServiceHandle> {
    let service_name = to_wide(name);
    let handle =
        unsafe { OpenServiceW(sc_manager.handle(), PCWSTR(service_name.as_ptr()), access) }?;
    Ok(ServiceHandle(handle))
}

fn is_win32(e: &windows::core::Error, code: WIN32_ERROR) -> bool {
    e.code() == code.to_hresult()
}

fn status_from(state: SERVICE_STATUS_CURRENT_STATE) -> ServiceStatus {
    match state {
        SERVICE_STOPPED => ServiceStatus::Stopped,
        SERVICE_RUNNING => ServiceStatus::Running,
        SERVICE_PAUSED => ServiceStatus::Paused,
        SERVICE_START_PENDING | SERVICE_STOP_PENDING | SERVICE_CONTINUE_PENDING
        | SERVICE_PAUSE_PENDING => ServiceStatus::Pending,
        _ => ServiceStatus::Unknown,
    }
}

/// [`ServiceOracle`] backed by the local Service Control Manager
///
/// Connects per call so the value stays `Send` and never holds a stale handle.
#[derive(Clone, Copy, Debug)]
pub struct HostServices;

impl HostServices {
    pub fn connect() -> Result<Self> {
        // Fail early if the SCM is unreachable.
        ScManagerHandle::connect(SC_MANAGER_CONNECT)
            .context("Failed to open Service Control Manager")?;
        Ok(Self)
    }
}

impl ServiceOracle for HostServices {
    fn query_status(&self, name: &str) -> Result<ServiceStatus, QueryError> {
        let host_error = |e: windows::core::Error| {
            if is_win32(&e, ERROR_SERVICE_DOES_NOT_EXIST) {
                QueryError::NotFound {
                    service: name.to_string(),
                }
            } else {
                QueryError::Host {
                    service: name.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let sc_manager = ScManagerHandle::connect(SC_MANAGER_CONNECT).map_err(host_error)?;
        let service = open_service(&sc_manager, name, SERVICE_QUERY_STATUS).map_err(host_error)?;
        let state = service.state().map_err(host_error)?;
        Ok(status_from(state))
    }

    fn request_start(&self, name: &str) -> Result<(), StartError> {
        let host_error = |e: windows::core::Error| {
            if is_win32(&e, ERROR_SERVICE_DOES_NOT_EXIST) {
                StartError::NotFound {
                    service: name.to_string(),
                }
            } else {
                StartError::Host {
                    service: name.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let sc_manager = ScManagerHandle::connect(SC_MANAGER_CONNECT).map_err(host_error)?;
        let service = open_service(&sc_manager, name, SERVICE_START).map_err(host_error)?;
        match service.start() {
            Ok(()) => Ok(()),
            // Someone else started it between our query and this request.
            Err(e) if is_win32(&e, ERROR_SERVICE_ALREADY_RUNNING) => Ok(()),
            Err(e) => Err(host_error(e)),
        }
    }
}

/// Create an own-process, demand-start service running `"<exe>" service <name>`
pub fn install(name: &ServiceName, config: Option<&Path>) -> Result<()> {
    let exe = std::env::current_exe().context("Failed to obtain executable path")?;
    let mut binary_path = format!("\"{}\" service {}", exe.display(), name);
    if let Some(config) = config {
        let config = std::fs::canonicalize(config)
            .context("Failed to resolve configuration path")?;
        binary_path.push_str(&format!(" --config \"{}\"", config.display()));
    }

    let sc_manager = ScManagerHandle::connect(SC_MANAGER_CONNECT | SC_MANAGER_CREATE_SERVICE)
        .context("Failed to open Service Control Manager for install")?;

    let service_name = to_wide(name.as_str());
    let binary_path_wide = to_wide(&binary_path);
    let handle = unsafe {
        CreateServiceW(
            sc_manager.handle(),
            PCWSTR(service_name.as_ptr()),
            PCWSTR::null(),
            SERVICE_ALL_ACCESS,
            SERVICE_WIN32_OWN_PROCESS,
            SERVICE_DEMAND_START,
            SERVICE_ERROR_NORMAL,
            PCWSTR(binary_path_wide.as_ptr()),
            PCWSTR::null(),
            None,
            PCWSTR::null(),
            PCWSTR::null(),
            PCWSTR::null(),
        )
    }
    .with_context(|| format!("Failed to create service {name}"))?;
    drop(ServiceHandle(handle));
    info!("created service {name} running {binary_path}");

    create_parameters_key(name)?;
    Ok(())
}

/// Create the empty `Parameters` key the registry store reads from
fn create_parameters_key(name: &ServiceName) -> Result<()> {
    let key_path = to_wide(&crate::config::registry_parameters_key(name));
    let mut key = HKEY::default();
    unsafe { RegCreateKeyW(HKEY_LOCAL_MACHINE, PCWSTR(key_path.as_ptr()), &mut key) }
        .ok()
        .context("Failed to create service Parameters registry key")?;
    drop(RegistryHandle(key));
    Ok(())
}

/// Stop the service if it is running, then delete it
pub fn delete(name: &ServiceName) -> Result<()> {
    let sc_manager = ScManagerHandle::connect(SC_MANAGER_CONNECT)
        .context("Failed to open Service Control Manager for delete")?;
    let service = open_service(&sc_manager, name.as_str(), SERVICE_ALL_ACCESS)
        .context("Failed to open service for delete")?;

    let state = service.state().context("Failed to query service status")?;
    if state != SERVICE_STOPPED {
        info!("{name} is {}; stopping it first", status_from(state));
        service.stop().context("Failed to stop service")?;
    }

    unsafe { DeleteService(service.handle()) }.context("Failed to delete service")?;
    Ok(())
}

/// Start the supervisor's own service via StartServiceW
pub fn start(name: &ServiceName) -> Result<()> {
    let sc_manager = ScManagerHandle::connect(SC_MANAGER_CONNECT)
        .context("Failed to open Service Control Manager for start")?;
    let service = open_service(&sc_manager, name.as_str(), SERVICE_START)
        .context("Failed to open service for start")?;
    service.start().context("Failed to start service")
}

/// Stop the supervisor's own service via ControlService
pub fn stop(name: &ServiceName) -> Result<()> {
    let sc_manager = ScManagerHandle::connect(SC_MANAGER_CONNECT)
        .context("Failed to open Service Control Manager for stop")?;
    let service = open_service(&sc_manager, name.as_str(), SERVICE_STOP)
        .context("Failed to open service for stop")?;
    service.stop().context("Failed to stop service")
}
