//! Poll-sleep-restart loop over the watched services.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use log::{debug, info, warn};

use crate::cancel::CancellationSignal;
use crate::config::MonitorConfig;
use crate::oracle::{ServiceOracle, ServiceStatus};

/// Outcome of one pass over every watched service.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleReport {
    /// Observed status per service, in configuration order.
    pub observed: Vec<(String, ServiceStatus)>,
    pub restarts_requested: usize,
    pub query_failures: usize,
    pub start_failures: usize,
}

/// Owns the monitoring loop. Talks to the host only through its [`ServiceOracle`].
pub struct MonitorEngine<O> {
    config: MonitorConfig,
    oracle: O,
}

impl<O: ServiceOracle> MonitorEngine<O> {
    pub fn new(config: MonitorConfig, oracle: O) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Queries every watched service once and requests a start for each one found stopped.
    ///
    /// Per-service failures are logged and counted; they never cut the pass short.
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for name in self.config.watched_services() {
            let status = match self.oracle.query_status(name) {
                Ok(status) => status,
                Err(e) => {
                    warn!("{e}; treating {name} as unknown this cycle");
                    report.query_failures += 1;
                    ServiceStatus::Unknown
                }
            };
            debug!("{name} is {status}");
            report.observed.push((name.clone(), status));

            if status != ServiceStatus::Stopped {
                continue;
            }

            info!("{name} is stopped; requesting start");
            report.restarts_requested += 1;
            if let Err(e) = self.oracle.request_start(name) {
                warn!("{e}");
                report.start_failures += 1;
            }
        }

        report
    }

    /// Runs until `cancel` is set. Returns the number of completed cycles.
    ///
    /// Cancellation is checked before every sleep and honoured as soon as a sleep is
    /// interrupted; a query already in flight is allowed to finish.
    pub fn run(&self, cancel: &CancellationSignal) -> usize {
        let initial_delay = self.config.initial_delay();
        if !initial_delay.is_zero() {
            debug!("waiting {initial_delay:?} before the first poll");
        }
        if cancel.wait_timeout(initial_delay) {
            return 0;
        }

        let mut cycles = 0;
        loop {
            let report = self.run_cycle();
            cycles += 1;
            debug!(
                "cycle {cycles}: {} services, {} restarts requested, {} query failures, {} start failures",
                report.observed.len(),
                report.restarts_requested,
                report.query_failures,
                report.start_failures
            );

            if cancel.is_cancelled() || cancel.wait_timeout(self.config.poll_interval()) {
                break;
            }
        }

        info!("monitoring stopped after {cycles} cycles");
        cycles
    }
}

impl<O: ServiceOracle + Send + 'static> MonitorEngine<O> {
    /// Starts the loop on its own thread.
    pub fn spawn(self, cancel: CancellationSignal) -> io::Result<MonitorHandle> {
        let (exited_tx, exited_rx) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name("monitor".to_string())
            .spawn(move || {
                // Dropped on return or unwind, which disconnects `exited_rx`.
                let _exited = exited_tx;
                self.run(&cancel)
            })?;

        Ok(MonitorHandle {
            thread,
            exited: exited_rx,
        })
    }
}

/// How the monitor thread ended when it was awaited.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MonitorExit {
    Finished { cycles: usize },
    Panicked,
    /// Still running when the grace period ran out; the thread is detached.
    TimedOut,
}

/// Join handle of a spawned monitor thread supporting a bounded wait.
pub struct MonitorHandle {
    thread: JoinHandle<usize>,
    exited: Receiver<()>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join_timeout(self, grace: Duration) -> MonitorExit {
        match self.exited.recv_timeout(grace) {
            Err(RecvTimeoutError::Timeout) => MonitorExit::TimedOut,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.thread.join() {
                Ok(cycles) => MonitorExit::Finished { cycles },
                Err(_) => MonitorExit::Panicked,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::fake::{Call, FakeOracle};
    use std::sync::Arc;
    use std::time::Instant;

    fn config(names: &[&str], poll_ms: u64, initial_ms: u64) -> MonitorConfig {
        MonitorConfig::new(
            names.iter().map(|n| n.to_string()).collect(),
            Duration::from_millis(poll_ms),
            Duration::from_millis(initial_ms),
        )
        .unwrap()
    }

    #[test]
    fn starts_only_stopped_services() {
        let oracle = FakeOracle::new()
            .with_status("A", ServiceStatus::Stopped)
            .with_status("B", ServiceStatus::Running)
            .with_status("C", ServiceStatus::Pending)
            .with_status("D", ServiceStatus::Paused)
            .with_query_failure("E");
        let engine = MonitorEngine::new(config(&["A", "B", "C", "D", "E"], 60_000, 0), oracle);

        let report = engine.run_cycle();

        assert_eq!(engine.oracle.starts(), ["A"]);
        assert_eq!(report.restarts_requested, 1);
        assert_eq!(report.query_failures, 1);
        assert_eq!(
            report.observed.last(),
            Some(&("E".to_string(), ServiceStatus::Unknown))
        );
    }

    #[test]
    fn queries_follow_configuration_order() {
        let oracle = FakeOracle::new()
            .with_status("zeta", ServiceStatus::Running)
            .with_status("alpha", ServiceStatus::Stopped);
        let engine = MonitorEngine::new(config(&["zeta", "alpha"], 60_000, 0), oracle);

        engine.run_cycle();

        assert_eq!(
            engine.oracle.calls(),
            [
                Call::Query("zeta".into()),
                Call::Query("alpha".into()),
                Call::Start("alpha".into()),
            ]
        );
    }

    #[test]
    fn failures_do_not_stop_the_cycle() {
        let oracle = FakeOracle::new()
            .with_status("A", ServiceStatus::Stopped)
            .with_start_failure("A")
            .with_query_failure("B")
            .with_status("C", ServiceStatus::Stopped);
        let engine = MonitorEngine::new(config(&["A", "B", "C"], 60_000, 0), oracle);

        let report = engine.run_cycle();

        assert_eq!(engine.oracle.starts(), ["A", "C"]);
        assert_eq!(report.start_failures, 1);
        assert_eq!(report.query_failures, 1);
        assert_eq!(report.restarts_requested, 2);
    }

    #[test]
    fn missing_service_is_treated_as_unknown() {
        let engine = MonitorEngine::new(config(&["ghost"], 60_000, 0), FakeOracle::new());
        let report = engine.run_cycle();
        assert_eq!(report.observed, [("ghost".to_string(), ServiceStatus::Unknown)]);
        assert!(engine.oracle.starts().is_empty());
    }

    #[test]
    fn still_stopped_service_is_requested_again_next_cycle() {
        let oracle = Arc::new(FakeOracle::new().with_status("A", ServiceStatus::Stopped));
        let cancel = CancellationSignal::new();
        let handle = MonitorEngine::new(config(&["A"], 20, 0), oracle.clone())
            .spawn(cancel.clone())
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        cancel.cancel();
        let exit = handle.join_timeout(Duration::from_secs(5));

        let MonitorExit::Finished { cycles } = exit else {
            panic!("monitor did not finish: {exit:?}");
        };
        assert!(cycles >= 2);
        assert_eq!(oracle.starts().len(), cycles);
    }

    #[test]
    fn failing_services_do_not_stop_later_cycles() {
        let oracle = Arc::new(
            FakeOracle::new()
                .with_query_failure("A")
                .with_status("B", ServiceStatus::Stopped)
                .with_start_failure("B"),
        );
        let cancel = CancellationSignal::new();
        let handle = MonitorEngine::new(config(&["A", "B"], 10, 0), oracle.clone())
            .spawn(cancel.clone())
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        cancel.cancel();
        let exit = handle.join_timeout(Duration::from_secs(5));

        let MonitorExit::Finished { cycles } = exit else {
            panic!("monitor did not finish: {exit:?}");
        };
        assert!(cycles >= 2, "only {cycles} cycles ran");
        assert_eq!(oracle.starts(), vec!["B".to_string(); cycles]);
    }

    #[test]
    fn first_poll_waits_for_initial_delay() {
        let oracle = Arc::new(FakeOracle::new().with_status("A", ServiceStatus::Running));
        let cancel = CancellationSignal::new();
        let started = Instant::now();
        let handle = MonitorEngine::new(config(&["A"], 60_000, 200), oracle.clone())
            .spawn(cancel.clone())
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(oracle.calls().is_empty());

        thread::sleep(Duration::from_millis(300));
        cancel.cancel();
        handle.join_timeout(Duration::from_secs(5));

        let calls = oracle.timed_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.duration_since(started) >= Duration::from_millis(200));
    }

    #[test]
    fn cancel_during_initial_delay_skips_polling() {
        let oracle = Arc::new(FakeOracle::new().with_status("A", ServiceStatus::Stopped));
        let cancel = CancellationSignal::new();
        let handle = MonitorEngine::new(config(&["A"], 60_000, 60_000), oracle.clone())
            .spawn(cancel.clone())
            .unwrap();

        cancel.cancel();
        assert_eq!(
            handle.join_timeout(Duration::from_secs(5)),
            MonitorExit::Finished { cycles: 0 }
        );
        assert!(oracle.calls().is_empty());
    }

    #[test]
    fn cancel_interrupts_poll_sleep() {
        let oracle = Arc::new(FakeOracle::new().with_status("A", ServiceStatus::Running));
        let cancel = CancellationSignal::new();
        let handle = MonitorEngine::new(config(&["A"], 60_000, 0), oracle.clone())
            .spawn(cancel.clone())
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        let cancelled_at = Instant::now();
        cancel.cancel();
        let exit = handle.join_timeout(Duration::from_secs(5));

        assert_eq!(exit, MonitorExit::Finished { cycles: 1 });
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cycles_are_spaced_by_poll_interval() {
        let oracle = Arc::new(FakeOracle::new().with_status("A", ServiceStatus::Running));
        let cancel = CancellationSignal::new();
        let handle = MonitorEngine::new(config(&["A"], 100, 0), oracle.clone())
            .spawn(cancel.clone())
            .unwrap();

        thread::sleep(Duration::from_millis(350));
        cancel.cancel();
        handle.join_timeout(Duration::from_secs(5));

        let times: Vec<Instant> = oracle.timed_calls().into_iter().map(|(t, _)| t).collect();
        assert!(times.len() >= 3);
        for pair in times.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_millis(100), "gap too short: {gap:?}");
            assert!(gap < Duration::from_millis(300), "gap too long: {gap:?}");
        }
    }

    #[test]
    fn join_times_out_on_a_stuck_monitor() {
        let (_keep, exited) = bounded::<()>(0);
        let thread = thread::spawn(|| {
            thread::sleep(Duration::from_millis(300));
            0
        });
        let handle = MonitorHandle { thread, exited };
        assert_eq!(
            handle.join_timeout(Duration::from_millis(20)),
            MonitorExit::TimedOut
        );
    }
}
