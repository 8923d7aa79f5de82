//! Daemonizer.
//!
//! Runs once the parent has received every listening fd from the
//! child: double-fork, detach the controlling terminal, and write the
//! pid file, the usual fork+`setsid`+`/dev/null` dance behind the
//! portable `daemon(3)` shim, generalized to a double fork and an
//! explicit pid-file write.

use crate::{cli::Invocation, error::Error, net::Fd};
use nix::{
    sys::wait::{waitpid, WaitStatus},
    unistd::{close, fork, setsid, ForkResult, Pid},
};
use std::{fs, io::Write, process};

/// The fully daemonized process: only this one runs the Relay Engine.
pub struct Grandchild {
    pub listeners: Vec<Fd>,
    pub invocation: Invocation,
}

/// Reap the listener child, double-fork to detach from the controlling
/// terminal, and write the pid file.
///
/// The first fork's parent and the second fork's parent both exit the
/// process directly; only the grandchild returns from this function.
pub fn daemonize(
    listeners: Vec<Fd>,
    child_pid: Pid,
    invocation: Invocation,
) -> Result<Grandchild, Error> {
    reap_listener_child(child_pid).map_err(Error::daemonize_failed)?;

    match unsafe { fork() }.map_err(Error::from).map_err(Error::daemonize_failed)? {
        ForkResult::Parent { .. } => {
            // First fork's parent: done, the middle process takes over.
            process::exit(0);
        }
        ForkResult::Child => {}
    }

    match unsafe { fork() }.map_err(Error::from).map_err(Error::daemonize_failed)? {
        ForkResult::Parent { child } => {
            write_pid_file(&invocation.pid_path, child).map_err(Error::daemonize_failed)?;
            let _ = close(libc::STDOUT_FILENO);
            let _ = close(libc::STDERR_FILENO);
            process::exit(0);
        }
        ForkResult::Child => {}
    }

    setsid().map_err(Error::from).map_err(Error::daemonize_failed)?;

    Ok(Grandchild {
        listeners,
        invocation,
    })
}

fn reap_listener_child(child_pid: Pid) -> Result<(), Error> {
    match waitpid(child_pid, None)? {
        WaitStatus::Exited(_, 0) => Ok(()),
        other => Err(Error::ChildFailed(other)),
    }
}

fn write_pid_file(path: &std::path::Path, pid: Pid) -> Result<(), Error> {
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", pid)?;
    Ok(())
}
