//! Capability interface to the host's service manager.

use crate::error::{QueryError, StartError};

/// Observed run state of a watched service at one point in time.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    /// Starting, stopping or otherwise in transition.
    Pending,
    Paused,
    /// The status query failed; never acted upon.
    Unknown,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Pending => "pending",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Queries and starts services registered with the host.
///
/// Implementations must bound the latency of both calls. `request_start` returns once the host
/// accepted (or rejected) the request; it never waits for the service to reach `Running`.
pub trait ServiceOracle {
    fn query_status(&self, name: &str) -> Result<ServiceStatus, QueryError>;

    fn request_start(&self, name: &str) -> Result<(), StartError>;
}

impl<T: ServiceOracle + ?Sized> ServiceOracle for Box<T> {
    fn query_status(&self, name: &str) -> Result<ServiceStatus, QueryError> {
        (**self).query_status(name)
    }

    fn request_start(&self, name: &str) -> Result<(), StartError> {
        (**self).request_start(name)
    }
}

impl<T: ServiceOracle + ?Sized> ServiceOracle for std::sync::Arc<T> {
    fn query_status(&self, name: &str) -> Result<ServiceStatus, QueryError> {
        (**self).query_status(name)
    }

    fn request_start(&self, name: &str) -> Result<(), StartError> {
        (**self).request_start(name)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted oracle for unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum Call {
        Query(String),
        Start(String),
    }

    /// Returns a fixed status per service; `None` scripts a query failure.
    #[derive(Default)]
    pub struct FakeOracle {
        statuses: Mutex<HashMap<String, Option<ServiceStatus>>>,
        failing_starts: Mutex<Vec<String>>,
        calls: Mutex<Vec<(Instant, Call)>>,
    }

    impl FakeOracle {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_status(self, name: &str, status: ServiceStatus) -> Self {
            self.set_status(name, Some(status));
            self
        }

        pub fn with_query_failure(self, name: &str) -> Self {
            self.set_status(name, None);
            self
        }

        pub fn with_start_failure(self, name: &str) -> Self {
            self.failing_starts.lock().unwrap().push(name.to_string());
            self
        }

        pub fn set_status(&self, name: &str, status: Option<ServiceStatus>) {
            self.statuses.lock().unwrap().insert(name.to_string(), status);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
        }

        pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn starts(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Start(name) => Some(name),
                    Call::Query(_) => None,
                })
                .collect()
        }
    }

    impl ServiceOracle for FakeOracle {
        fn query_status(&self, name: &str) -> Result<ServiceStatus, QueryError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), Call::Query(name.to_string())));
            match self.statuses.lock().unwrap().get(name) {
                Some(Some(status)) => Ok(*status),
                Some(None) => Err(QueryError::Host {
                    service: name.to_string(),
                    reason: "scripted failure".to_string(),
                }),
                None => Err(QueryError::NotFound {
                    service: name.to_string(),
                }),
            }
        }

        fn request_start(&self, name: &str) -> Result<(), StartError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), Call::Start(name.to_string())));
            if self.failing_starts.lock().unwrap().iter().any(|n| n == name) {
                return Err(StartError::Host {
                    service: name.to_string(),
                    reason: "scripted failure".to_string(),
                });
            }
            Ok(())
        }
    }
}
