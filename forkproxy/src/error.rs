//! Error taxonomy for the `forkproxy` helper.
//!
//! Each variant corresponds to a distinct failure domain: bad
//! invocation, missing privilege, namespace entry, listener bind, fd
//! handoff, daemonizing, and per-connection relay errors. Only the
//! first six are fatal to the whole process; dial and relay failures
//! are logged and handled at the call site instead of being propagated
//! through `main`.

use derive_more::{Display, From};
use std::{io, num};

/// Errors produced anywhere in the `forkproxy` helper.
#[derive(Debug, Display, From)]
pub enum Error {
    #[display(fmt = "I/O error: {}", "_0")]
    IoError(io::Error),
    #[display(fmt = "{}", "_0")]
    UnixError(nix::Error),
    #[display(fmt = "bad invocation: {}", "_0")]
    #[from(ignore)]
    BadInvocation(&'static str),
    #[display(fmt = "invalid address {:?}: {}", "_0", "_1")]
    #[from(ignore)]
    BadAddress(String, &'static str),
    #[display(fmt = "invalid port number: {}", "_0")]
    InvalidPort(num::ParseIntError),
    #[display(fmt = "must run with effective uid 0")]
    NotPrivileged,
    #[display(fmt = "failed to enter namespaces: {}", "_0")]
    #[from(ignore)]
    NamespaceEntryFailed(Box<Error>),
    #[display(fmt = "failed to bind listener for {} after retries: {}", "_0", "_1")]
    #[from(ignore)]
    BindFailed(String, Box<Error>),
    #[display(fmt = "fd handoff failed: {}", "_0")]
    #[from(ignore)]
    HandoffFailed(Box<Error>),
    #[display(fmt = "daemonize failed: {}", "_0")]
    #[from(ignore)]
    DaemonizeFailed(Box<Error>),
    #[display(fmt = "listen child exited uncleanly: {:?}", "_0")]
    #[from(ignore)]
    ChildFailed(nix::sys::wait::WaitStatus),
    #[display(fmt = "failed to dial {}: {}", "_0", "_1")]
    #[from(ignore)]
    DialFailed(String, Box<Error>),
    #[display(fmt = "relay I/O error: {}", "_0")]
    #[from(ignore)]
    RelayIo(io::Error),
    #[display(fmt = "ancillary data truncated: expected {} fds, forwarded {}", "_0", "_1")]
    #[from(ignore)]
    PartialOob(usize, usize),
    #[cfg(feature = "log")]
    #[display(fmt = "failed to initialize logger: {}", "_0")]
    #[from(ignore)]
    LogInit(Box<dyn std::error::Error + Send + Sync>),
}

impl std::error::Error for Error {}

impl Error {
    /// Wrap an underlying error as a namespace-entry failure.
    pub fn namespace_entry(err: impl Into<Error>) -> Error {
        Error::NamespaceEntryFailed(Box::new(err.into()))
    }

    /// Wrap an underlying error as a bind failure for `address`.
    pub fn bind_failed(address: impl Into<String>, err: impl Into<Error>) -> Error {
        Error::BindFailed(address.into(), Box::new(err.into()))
    }

    /// Wrap an underlying error as a handoff failure.
    pub fn handoff_failed(err: impl Into<Error>) -> Error {
        Error::HandoffFailed(Box::new(err.into()))
    }

    /// Wrap an underlying error as a daemonize failure.
    pub fn daemonize_failed(err: impl Into<Error>) -> Error {
        Error::DaemonizeFailed(Box::new(err.into()))
    }

    /// Wrap an underlying error as a dial failure against `address`.
    pub fn dial_failed(address: impl Into<String>, err: impl Into<Error>) -> Error {
        Error::DialFailed(address.into(), Box::new(err.into()))
    }
}
