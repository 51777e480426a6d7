//! Turns process interrupts into [`ControlRequest`]s.
//!
//! The OS handler only stores the signal number in an atomic; a forwarder thread polls it
//! coarsely and sends the matching request to the lifecycle controller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, tick};
use log::{error, info};

use crate::lifecycle::ControlRequest;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

static RECEIVED_SIGNAL: AtomicUsize = AtomicUsize::new(0);

#[cfg(unix)]
pub fn install_handlers() -> anyhow::Result<()> {
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

    extern "C" fn handler(sig: i32) {
        RECEIVED_SIGNAL.store(sig as usize, Ordering::SeqCst);
    }

    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { signal::sigaction(sig, &action) }
            .map_err(|e| anyhow::anyhow!("Failed to register {sig} handler: {e}"))?;
    }
    Ok(())
}

#[cfg(unix)]
fn request_for(sig: usize) -> Option<ControlRequest> {
    use nix::sys::signal::Signal;

    match Signal::try_from(sig as i32) {
        Ok(Signal::SIGTERM) => Some(ControlRequest::Stop),
        Ok(Signal::SIGINT) => Some(ControlRequest::Interrupt),
        Ok(other) => {
            error!("unexpected signal {other} recorded");
            None
        }
        Err(e) => {
            error!("BUG: invalid signal number {sig} from signal handler: {e}");
            None
        }
    }
}

#[cfg(windows)]
pub fn install_handlers() -> anyhow::Result<()> {
    use windows::Win32::System::Console::SetConsoleCtrlHandler;
    use windows::core::BOOL;

    unsafe extern "system" fn handler(ctrl_type: u32) -> BOOL {
        // Stored +1 so that CTRL_C_EVENT (0) is distinguishable from "nothing received".
        RECEIVED_SIGNAL.store(ctrl_type as usize + 1, Ordering::SeqCst);
        BOOL::from(true)
    }

    unsafe { SetConsoleCtrlHandler(Some(handler), true) }
        .map_err(|e| anyhow::anyhow!("Failed to register console control handler: {e}"))?;
    Ok(())
}

#[cfg(windows)]
fn request_for(stored: usize) -> Option<ControlRequest> {
    use windows::Win32::System::Console::{
        CTRL_BREAK_EVENT, CTRL_C_EVENT, CTRL_CLOSE_EVENT, CTRL_LOGOFF_EVENT, CTRL_SHUTDOWN_EVENT,
    };

    let ctrl_type = (stored - 1) as u32;
    match ctrl_type {
        t if t == CTRL_C_EVENT || t == CTRL_BREAK_EVENT => Some(ControlRequest::Interrupt),
        t if t == CTRL_CLOSE_EVENT || t == CTRL_LOGOFF_EVENT || t == CTRL_SHUTDOWN_EVENT => {
            Some(ControlRequest::Shutdown)
        }
        other => {
            error!("unexpected console control event {other}");
            None
        }
    }
}

/// Non‑blocking check – returns a request at most once per received signal.
fn check_signal() -> Option<ControlRequest> {
    let val = RECEIVED_SIGNAL.swap(0, Ordering::AcqRel);
    if val == 0 { None } else { request_for(val) }
}

/// Spawns the thread that forwards the first interrupt to `requests`.
pub fn forward_to(requests: Sender<ControlRequest>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("interrupts".to_string())
        .spawn(move || {
            for _ in tick(POLL_INTERVAL).iter() {
                if let Some(request) = check_signal() {
                    info!("{request:?} received – orderly shutdown");
                    // The controller may already be gone; nothing left to do then.
                    let _ = requests.send(request);
                    return;
                }
            }
        })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use nix::sys::signal::Signal;

    #[test]
    fn forwards_a_recorded_sigterm_as_stop() {
        let (tx, rx) = unbounded();
        let forwarder = forward_to(tx).unwrap();

        RECEIVED_SIGNAL.store(Signal::SIGTERM as usize, Ordering::SeqCst);

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(ControlRequest::Stop));
        forwarder.join().unwrap();
        assert_eq!(check_signal(), None);
    }

    #[test]
    fn maps_signals_to_requests() {
        assert_eq!(request_for(Signal::SIGINT as usize), Some(ControlRequest::Interrupt));
        assert_eq!(request_for(Signal::SIGTERM as usize), Some(ControlRequest::Stop));
        assert_eq!(request_for(Signal::SIGHUP as usize), None);
    }
}
