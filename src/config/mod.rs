//! Monitoring parameters, resolved once at startup from a persisted key-value store.
//!
//! The store itself is a seam ([`ConfigStore`]): the Windows registry in managed-service mode,
//! a TOML file elsewhere (or when `--config` is given), and [`MemoryStore`] for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{LevelFilter, warn};

use crate::error::ConfigError;

mod file;
#[cfg(target_os = "windows")]
mod registry;

pub use file::FileStore;
#[cfg(target_os = "windows")]
pub use registry::RegistryStore;
#[cfg(target_os = "windows")]
pub(crate) use registry::parameters_key as registry_parameters_key;

/// Ordered list of service names that must be kept running. Required.
pub const SERVICES_EXPECTED_RUNNING: &str = "ServicesExpectedRunning";
/// Poll interval in milliseconds. Required, must be positive.
pub const SLEEP_DURATION_MS: &str = "SleepDurationMilliseconds";
/// Delay before the first poll in milliseconds. Optional, defaults to zero.
pub const INITIAL_SLEEP_DURATION_MS: &str = "InitialSleepDurationMilliseconds";
/// Log file used in managed-service mode. Optional.
pub const LOG_PATH: &str = "LogPath";
/// Log verbosity for [`LOG_PATH`], 1 (error) through 5 (trace). Optional.
pub const LOG_LEVEL: &str = "LogLevel";

/// Name of the supervisor's own service; also the key into persisted configuration.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::MalformedValue {
                key: "service name",
                reason: "name is empty".to_string(),
            });
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(ConfigError::MalformedValue {
                key: "service name",
                reason: format!("{name:?} contains a path separator or NUL"),
            });
        }
        Ok(Self(name))
    }

    /// Uses `explicit` if given, otherwise the running executable's file stem.
    pub fn resolve(explicit: Option<&str>) -> Result<Self, ConfigError> {
        match explicit {
            Some(name) => Self::new(name),
            None => {
                let exe = std::env::current_exe().map_err(|e| ConfigError::Store {
                    location: "executable path".to_string(),
                    reason: e.to_string(),
                })?;
                Self::from_executable_path(&exe)
            }
        }
    }

    fn from_executable_path(path: &Path) -> Result<Self, ConfigError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::MalformedValue {
                key: "service name",
                reason: format!("executable path {} has no usable file name", path.display()),
            })?;
        Self::new(stem)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single persisted option, already decoded from the store's native encoding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigValue {
    Integer(u64),
    Text(String),
    TextList(Vec<String>),
    /// A value the supervisor never accepts, tagged with the store's type name.
    Other(String),
}

impl ConfigValue {
    pub fn type_name(&self) -> &str {
        match self {
            Self::Integer(_) => "integer",
            Self::Text(_) => "string",
            Self::TextList(_) => "string list",
            Self::Other(name) => name,
        }
    }
}

/// Read-only view of the persisted options for one service.
pub trait ConfigStore {
    /// Human-readable location of the store, for diagnostics.
    fn location(&self) -> String;

    /// Reads `key`. Absent keys are `Ok(None)`; only store access failures are errors.
    fn read(&self, key: &str) -> Result<Option<ConfigValue>, ConfigError>;
}

/// In-memory store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, ConfigValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: ConfigValue) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl ConfigStore for MemoryStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn read(&self, key: &str) -> Result<Option<ConfigValue>, ConfigError> {
        Ok(self.values.get(key).cloned())
    }
}

/// Validated monitoring parameters. Immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MonitorConfig {
    watched_services: Vec<String>,
    poll_interval: Duration,
    initial_delay: Duration,
}

impl MonitorConfig {
    pub fn new(
        watched_services: Vec<String>,
        poll_interval: Duration,
        initial_delay: Duration,
    ) -> Result<Self, ConfigError> {
        let mut unique: Vec<String> = Vec::with_capacity(watched_services.len());
        for name in watched_services {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ConfigError::MalformedValue {
                    key: SERVICES_EXPECTED_RUNNING,
                    reason: "contains an empty service name".to_string(),
                });
            }
            if unique.contains(&name) {
                warn!("{SERVICES_EXPECTED_RUNNING} lists {name:?} more than once; ignoring repeat");
                continue;
            }
            unique.push(name);
        }
        if unique.is_empty() {
            return Err(ConfigError::MalformedValue {
                key: SERVICES_EXPECTED_RUNNING,
                reason: "no services listed".to_string(),
            });
        }
        if poll_interval.is_zero() {
            return Err(ConfigError::MalformedValue {
                key: SLEEP_DURATION_MS,
                reason: "poll interval must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            watched_services: unique,
            poll_interval,
            initial_delay,
        })
    }

    /// Watched service names in configuration order.
    pub fn watched_services(&self) -> &[String] {
        &self.watched_services
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }
}

/// Reads and validates the monitoring parameters. Called exactly once per process.
pub fn load_monitor_config(store: &dyn ConfigStore) -> Result<MonitorConfig, ConfigError> {
    let watched = match store.read(SERVICES_EXPECTED_RUNNING)? {
        Some(ConfigValue::TextList(names)) => names,
        Some(other) => {
            return Err(ConfigError::MalformedValue {
                key: SERVICES_EXPECTED_RUNNING,
                reason: format!("expected a string list, found {}", other.type_name()),
            });
        }
        None => {
            return Err(ConfigError::MissingRequiredKey {
                key: SERVICES_EXPECTED_RUNNING,
            });
        }
    };

    let poll_ms = read_milliseconds(store, SLEEP_DURATION_MS)?.ok_or(
        ConfigError::MissingRequiredKey {
            key: SLEEP_DURATION_MS,
        },
    )?;
    let initial_ms = read_milliseconds(store, INITIAL_SLEEP_DURATION_MS)?.unwrap_or(0);

    MonitorConfig::new(
        watched,
        Duration::from_millis(poll_ms),
        Duration::from_millis(initial_ms),
    )
}

fn read_milliseconds(store: &dyn ConfigStore, key: &'static str) -> Result<Option<u64>, ConfigError> {
    match store.read(key)? {
        Some(ConfigValue::Integer(ms)) => Ok(Some(ms)),
        Some(other) => Err(ConfigError::MalformedValue {
            key,
            reason: format!("expected an integer, found {}", other.type_name()),
        }),
        None => Ok(None),
    }
}

/// File logging options for managed-service mode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogSettings {
    pub path: PathBuf,
    pub level: LevelFilter,
}

/// Reads the optional `LogPath`/`LogLevel` pair. `None` when no log path is configured.
pub fn load_log_settings(store: &dyn ConfigStore) -> Result<Option<LogSettings>, ConfigError> {
    let path = match store.read(LOG_PATH)? {
        Some(ConfigValue::Text(path)) => PathBuf::from(path),
        Some(other) => {
            return Err(ConfigError::MalformedValue {
                key: LOG_PATH,
                reason: format!("expected a string, found {}", other.type_name()),
            });
        }
        None => return Ok(None),
    };

    let level = match store.read(LOG_LEVEL)? {
        Some(ConfigValue::Integer(n)) => level_from_number(n),
        Some(other) => {
            return Err(ConfigError::MalformedValue {
                key: LOG_LEVEL,
                reason: format!("expected an integer, found {}", other.type_name()),
            });
        }
        None => LevelFilter::Error,
    };

    Ok(Some(LogSettings { path, level }))
}

// Out-of-range levels clamp to the most verbose one.
fn level_from_number(n: u64) -> LevelFilter {
    log::Level::iter()
        .find(|level| *level as u64 == n)
        .map(|level| level.to_level_filter())
        .unwrap_or(LevelFilter::Trace)
}

/// The platform's default store for `name`, or a [`FileStore`] at `explicit` if given.
pub fn open_store(name: &ServiceName, explicit: Option<&Path>) -> Box<dyn ConfigStore> {
    if let Some(path) = explicit {
        return Box::new(FileStore::new(path));
    }

    #[cfg(target_os = "windows")]
    return Box::new(RegistryStore::for_service(name));

    #[cfg(not(target_os = "windows"))]
    return Box::new(FileStore::new(FileStore::default_path(name)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with(
                SERVICES_EXPECTED_RUNNING,
                ConfigValue::TextList(vec!["Spooler".into(), "W32Time".into()]),
            )
            .with(SLEEP_DURATION_MS, ConfigValue::Integer(60_000))
    }

    #[test]
    fn loads_required_values_with_default_delay() {
        let cfg = load_monitor_config(&store()).unwrap();
        assert_eq!(cfg.watched_services(), ["Spooler", "W32Time"]);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.initial_delay(), Duration::ZERO);
    }

    #[test]
    fn reads_initial_delay() {
        let store = store().with(INITIAL_SLEEP_DURATION_MS, ConfigValue::Integer(5_000));
        let cfg = load_monitor_config(&store).unwrap();
        assert_eq!(cfg.initial_delay(), Duration::from_secs(5));
    }

    #[test]
    fn missing_service_list_is_reported() {
        let store = MemoryStore::new().with(SLEEP_DURATION_MS, ConfigValue::Integer(1_000));
        let err = load_monitor_config(&store).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequiredKey { key } if key == SERVICES_EXPECTED_RUNNING
        ));
    }

    #[test]
    fn missing_poll_interval_is_reported() {
        let store = MemoryStore::new().with(
            SERVICES_EXPECTED_RUNNING,
            ConfigValue::TextList(vec!["a".into()]),
        );
        let err = load_monitor_config(&store).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequiredKey { key } if key == SLEEP_DURATION_MS
        ));
    }

    #[test]
    fn zero_poll_interval_is_malformed() {
        let store = store().with(SLEEP_DURATION_MS, ConfigValue::Integer(0));
        let err = load_monitor_config(&store).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedValue { key, .. } if key == SLEEP_DURATION_MS
        ));
    }

    #[test]
    fn wrongly_typed_values_are_malformed() {
        let text_poll = store().with(SLEEP_DURATION_MS, ConfigValue::Text("1000".into()));
        assert!(matches!(
            load_monitor_config(&text_poll),
            Err(ConfigError::MalformedValue { key, .. }) if key == SLEEP_DURATION_MS
        ));

        let text_list = store_with_list(ConfigValue::Text("Spooler".into()));
        assert!(matches!(
            load_monitor_config(&text_list),
            Err(ConfigError::MalformedValue { key, .. }) if key == SERVICES_EXPECTED_RUNNING
        ));

        let binary_delay =
            store().with(INITIAL_SLEEP_DURATION_MS, ConfigValue::Other("REG_BINARY".into()));
        assert!(matches!(
            load_monitor_config(&binary_delay),
            Err(ConfigError::MalformedValue { key, .. }) if key == INITIAL_SLEEP_DURATION_MS
        ));
    }

    fn store_with_list(value: ConfigValue) -> MemoryStore {
        MemoryStore::new()
            .with(SERVICES_EXPECTED_RUNNING, value)
            .with(SLEEP_DURATION_MS, ConfigValue::Integer(1_000))
    }

    #[test]
    fn empty_list_is_malformed() {
        let store = store_with_list(ConfigValue::TextList(vec![]));
        assert!(matches!(
            load_monitor_config(&store),
            Err(ConfigError::MalformedValue { key, .. }) if key == SERVICES_EXPECTED_RUNNING
        ));

        let store = store_with_list(ConfigValue::TextList(vec!["a".into(), "  ".into()]));
        assert!(load_monitor_config(&store).is_err());
    }

    #[test]
    fn duplicates_keep_first_occurrence_order() {
        let store = store_with_list(ConfigValue::TextList(vec![
            "b".into(),
            "a".into(),
            "b".into(),
            "c".into(),
        ]));
        let cfg = load_monitor_config(&store).unwrap();
        assert_eq!(cfg.watched_services(), ["b", "a", "c"]);
    }

    #[test]
    fn log_settings_default_to_error_level() {
        assert_eq!(load_log_settings(&MemoryStore::new()).unwrap(), None);

        let store = MemoryStore::new().with(LOG_PATH, ConfigValue::Text("/var/log/x.log".into()));
        let settings = load_log_settings(&store).unwrap().unwrap();
        assert_eq!(settings.path, PathBuf::from("/var/log/x.log"));
        assert_eq!(settings.level, LevelFilter::Error);
    }

    #[test]
    fn log_level_numbers_map_and_clamp() {
        assert_eq!(level_from_number(1), LevelFilter::Error);
        assert_eq!(level_from_number(3), LevelFilter::Info);
        assert_eq!(level_from_number(5), LevelFilter::Trace);
        assert_eq!(level_from_number(42), LevelFilter::Trace);
    }

    #[test]
    fn service_names_are_validated() {
        assert_eq!(ServiceName::new("Watcher").unwrap().as_str(), "Watcher");
        assert!(ServiceName::new("").is_err());
        assert!(ServiceName::new("a/b").is_err());
        assert!(ServiceName::new("a\\b").is_err());
    }

    #[test]
    fn service_name_from_executable_drops_extension() {
        let name = ServiceName::from_executable_path(Path::new("/opt/bin/keeper.exe")).unwrap();
        assert_eq!(name.as_str(), "keeper");
        assert_eq!(ServiceName::resolve(Some("explicit")).unwrap().as_str(), "explicit");
    }
}
