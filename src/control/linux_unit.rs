//! Systemd unit file generation for the supervisor's own service.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::ServiceName;

/// Whether the unit lives in the system or the per-user systemd instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Scope {
    System,
    User,
}

impl Scope {
    pub(super) fn current() -> Self {
        if unsafe { libc::getuid() } == 0 {
            Self::System
        } else {
            Self::User
        }
    }

    pub(super) fn unit_dir(self) -> Result<PathBuf> {
        match self {
            Self::System => Ok(PathBuf::from("/etc/systemd/system")),
            Self::User => Ok(dirs::config_dir()
                .context("Could not determine config directory")?
                .join("systemd")
                .join("user")),
        }
    }
}

pub(super) struct UnitSpec<'a> {
    pub name: &'a ServiceName,
    pub binary_path: &'a Path,
    pub config: Option<&'a Path>,
    pub scope: Scope,
    pub notify: bool,
}

pub(super) fn unit_file_name(name: &ServiceName) -> String {
    format!("{name}.service")
}

/// Generate unit file content
pub(super) fn generate_unit_content(spec: &UnitSpec) -> String {
    let mut content = String::with_capacity(512);

    content.push_str("[Unit]\n");
    content.push_str(&format!(
        "Description=Keeps configured services running ({})\n",
        spec.name
    ));
    if spec.scope == Scope::System {
        content.push_str("After=multi-user.target\n");
    }
    content.push('\n');

    content.push_str("[Service]\n");
    if spec.notify {
        content.push_str("Type=notify\n");
        content.push_str("NotifyAccess=main\n");
    } else {
        content.push_str("Type=simple\n");
    }

    let mut exec_start = format!(
        "ExecStart=\"{}\" service {}",
        spec.binary_path.display(),
        spec.name
    );
    if let Some(config) = spec.config {
        exec_start.push_str(&format!(" --config \"{}\"", config.display()));
    }
    content.push_str(&exec_start);
    content.push('\n');
    content.push_str("Restart=on-failure\n");
    content.push_str("RestartSec=5s\n");
    content.push('\n');

    content.push_str("[Install]\n");
    match spec.scope {
        Scope::System => content.push_str("WantedBy=multi-user.target\n"),
        Scope::User => content.push_str("WantedBy=default.target\n"),
    }

    content
}

/// Write the unit file atomically into `unit_dir`
pub(super) fn write_unit(spec: &UnitSpec, unit_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(unit_dir).context("Failed to create systemd unit directory")?;

    let unit_path = unit_dir.join(unit_file_name(spec.name));
    let tmp_path = unit_path.with_extension("service.tmp");
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(generate_unit_content(spec).as_bytes())
            .context("Failed to write unit file")?;
        file.sync_all().context("Failed to sync unit file")?;
    }

    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o644))
        .context("Failed to set unit file permissions")?;
    fs::rename(&tmp_path, &unit_path)
        .with_context(|| format!("Failed to move unit file to {}", unit_path.display()))?;

    Ok(unit_path)
}
