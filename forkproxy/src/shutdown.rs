//! Shutdown Supervisor.
//!
//! Watches for `SIGTERM`, flips a shared terminate flag, wakes every
//! accept/poll loop waiting on [`Supervisor::notified`], and removes
//! the non-abstract UNIX socket paths this process created.
//!
//! Each listener fd is owned solely by the task accepting on it
//! (`relay::stream::accept_loop`, `relay::udp::run`); those tasks race
//! their accept/poll against [`Supervisor::notified`] and return on
//! wakeup, which drops and closes the listener they alone hold. That is
//! this supervisor's realization of "closes all listener fds" (spec
//! §4.6): it does not hold the fds itself, it wakes the tasks that do.
//!
//! A blocking `poll(2)` call has no portable way to be interrupted
//! other than a self-delivered signal. Since the relay engine here is
//! built on tokio, the UDP poll loop instead selects over the same
//! [`tokio::sync::Notify`] used by the stream accept loops, the
//! eventfd/self-pipe equivalent of a wakeup — so no signal needs to be
//! sent to the process itself.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;

#[cfg(feature = "log")]
use forkproxy_log::info;

/// Shared shutdown state, cheaply cloned into every task that needs to
/// observe termination.
#[derive(Clone)]
pub struct Supervisor {
    terminate: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            terminate: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// True once `SIGTERM` has been observed.
    pub fn is_terminating(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested; safe to await from
    /// multiple tasks concurrently (`Notify::notified` + `notify_waiters`).
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Install the `SIGTERM` handler and run until it fires, then
    /// unlink every non-abstract UNIX socket path this process is
    /// responsible for.
    pub async fn run(self, unix_paths: Vec<PathBuf>) -> Result<(), crate::error::Error> {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        sigterm.recv().await;

        log_stopping();

        self.terminate.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();

        for path in unix_paths {
            let _ = std::fs::remove_file(path);
        }

        Ok(())
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "log")]
fn log_stopping() {
    info!("Stopping proxy");
}

#[cfg(not(feature = "log"))]
fn log_stopping() {
    eprintln!("Stopping proxy");
}
