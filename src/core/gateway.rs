//! # Signal gateway: process-wide termination flag.
//!
//! Exactly one gateway exists per process. Its handler for `SIGINT`/`SIGTERM`
//! only touches one static atomic:
//!
//! ```text
//! signal ─► FLAG.swap(true)
//!             ├─ was false ─► armed; the main loop notices on its next poll
//!             └─ was true  ─► _exit(FORCED_EXIT_CODE)   (no cleanup, children may survive)
//! ```
//!
//! The control loop polls [`SignalGateway::wait_armed`] and then runs the
//! ordinary graceful stop of the root node.
//!
//! On non-unix platforms the first Ctrl-C arms the same flag through
//! `tokio::signal::ctrl_c`; there is no forced second-signal path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::GatewayError;

/// Exit code of the second-signal immediate exit.
pub const FORCED_EXIT_CODE: i32 = 130;

static ARMED: AtomicBool = AtomicBool::new(false);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Effect of one delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: the flag is now armed.
    Armed,
    /// Flag was already armed: exit immediately.
    ExitNow,
}

/// Flag transition performed by the handler.
#[inline]
pub fn on_signal(flag: &AtomicBool) -> SignalAction {
    if flag.swap(true, Ordering::SeqCst) {
        SignalAction::ExitNow
    } else {
        SignalAction::Armed
    }
}

#[cfg(unix)]
extern "C" fn handle_signal(_sig: libc::c_int) {
    if let SignalAction::ExitNow = on_signal(&ARMED) {
        // SAFETY: `_exit` is async-signal-safe.
        unsafe { libc::_exit(FORCED_EXIT_CODE) }
    }
}

/// Installed process-wide signal gateway.
#[derive(Debug)]
pub struct SignalGateway {
    _private: (),
}

impl SignalGateway {
    /// Installs the handler. A second install in the same process fails.
    pub fn install() -> Result<Self, GatewayError> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyInstalled);
        }
        if let Err(e) = register() {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(Self { _private: () })
    }

    /// True once a signal (or [`arm`](Self::arm)) armed the flag.
    pub fn armed(&self) -> bool {
        ARMED.load(Ordering::SeqCst)
    }

    /// Arms the flag programmatically.
    pub fn arm(&self) {
        ARMED.store(true, Ordering::SeqCst);
    }

    /// Polls the flag every `poll` until it is armed.
    pub async fn wait_armed(&self, poll: Duration) {
        let poll = poll.max(Duration::from_millis(1));
        while !self.armed() {
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(unix)]
fn register() -> Result<(), GatewayError> {
    let handler = handle_signal as extern "C" fn(libc::c_int);
    let handler_ptr = handler as *const () as libc::sighandler_t;
    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only performs an atomic swap and `_exit`.
        let prev = unsafe { libc::signal(sig, handler_ptr) };
        if prev == libc::SIG_ERR {
            return Err(GatewayError::Install {
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn register() -> Result<(), GatewayError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|e| GatewayError::Install {
        reason: e.to_string(),
    })?;
    handle.spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            ARMED.store(true, Ordering::SeqCst);
        }
    });
    Ok(())
}
