//! TOML-file backed configuration store.
//!
//! The file uses the persisted option names as top-level keys:
//!
//! ```toml
//! ServicesExpectedRunning = ["nginx", "postgresql"]
//! SleepDurationMilliseconds = 60000
//! InitialSleepDurationMilliseconds = 5000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;

use super::{ConfigStore, ConfigValue, ServiceName};
use crate::error::ConfigError;

/// Reads the file on first access and answers every later read from that snapshot.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: OnceCell<toml::Table>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: OnceCell::new(),
        }
    }

    /// `/etc/<name>/<name>.toml` for root, the user config directory otherwise.
    pub fn default_path(name: &ServiceName) -> PathBuf {
        let file_name = format!("{name}.toml");

        #[cfg(unix)]
        {
            if unsafe { libc::getuid() } == 0 {
                return PathBuf::from("/etc").join(name.as_str()).join(file_name);
            }
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(name.as_str())
            .join(file_name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_table(&self) -> Result<toml::Table, ConfigError> {
        let content = fs::read_to_string(&self.path).map_err(|e| ConfigError::Store {
            location: self.location(),
            reason: e.to_string(),
        })?;
        content.parse::<toml::Table>().map_err(|e| ConfigError::Store {
            location: self.location(),
            reason: e.to_string(),
        })
    }
}

impl ConfigStore for FileStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self, key: &str) -> Result<Option<ConfigValue>, ConfigError> {
        let table = self.table.get_or_try_init(|| self.load_table())?;
        Ok(table.get(key).map(to_config_value))
    }
}

fn to_config_value(value: &toml::Value) -> ConfigValue {
    match value {
        toml::Value::Integer(n) => match u64::try_from(*n) {
            Ok(n) => ConfigValue::Integer(n),
            Err(_) => ConfigValue::Other("negative integer".to_string()),
        },
        toml::Value::String(s) => ConfigValue::Text(s.clone()),
        toml::Value::Array(items) => {
            let strings: Option<Vec<String>> = items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect();
            match strings {
                Some(list) => ConfigValue::TextList(list),
                None => ConfigValue::Other("mixed array".to_string()),
            }
        }
        other => ConfigValue::Other(other.type_str().to_string()),
    }
}
