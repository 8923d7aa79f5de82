//! `forkproxy` — a container/VM network proxy helper.
//!
//! Joins the listen endpoint's user/network/mount namespaces in one
//! forked process and the connect endpoint's in the other, hands the
//! listening sockets across that fork over `SCM_RIGHTS`, daemonizes the
//! surviving process, and relays TCP, UDP, and UNIX (with fd passing)
//! traffic between the two namespaces until `SIGTERM`.

pub mod addr;
pub mod cli;
pub mod daemonize;
pub mod error;
pub mod net;
pub mod nsenter;
pub mod relay;
pub mod shutdown;

pub use error::Error;
