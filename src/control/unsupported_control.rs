//! Fallback for hosts without a supported service manager.
//!
//! Console mode still works against a [`HostServices`] that reports every query as failed,
//! so configuration can be validated; the managed-service verbs refuse to run.

use std::path::Path;

use anyhow::Result;

use crate::config::ServiceName;
use crate::error::{QueryError, StartError};
use crate::oracle::{ServiceOracle, ServiceStatus};

const UNSUPPORTED: &str = "no supported service manager on this platform";

#[derive(Clone, Copy, Debug)]
pub struct HostServices;

impl HostServices {
    pub fn connect() -> Result<Self> {
        Ok(Self)
    }
}

impl ServiceOracle for HostServices {
    fn query_status(&self, name: &str) -> Result<ServiceStatus, QueryError> {
        Err(QueryError::Host {
            service: name.to_string(),
            reason: UNSUPPORTED.to_string(),
        })
    }

    fn request_start(&self, name: &str) -> Result<(), StartError> {
        Err(StartError::Host {
            service: name.to_string(),
            reason: UNSUPPORTED.to_string(),
        })
    }
}

pub fn install(_name: &ServiceName, _config: Option<&Path>) -> Result<()> {
    anyhow::bail!("install: {UNSUPPORTED}")
}

pub fn delete(_name: &ServiceName) -> Result<()> {
    anyhow::bail!("delete: {UNSUPPORTED}")
}

pub fn start(_name: &ServiceName) -> Result<()> {
    anyhow::bail!("start: {UNSUPPORTED}")
}

pub fn stop(_name: &ServiceName) -> Result<()> {
    anyhow::bail!("stop: {UNSUPPORTED}")
}

pub fn run_service(_name: &ServiceName, _config: Option<&Path>) -> Result<()> {
    anyhow::bail!("service mode: {UNSUPPORTED}")
}
