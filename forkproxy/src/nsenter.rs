//! Namespace Entry Shim.
//!
//! This runs before any async runtime exists: `main` calls
//! [`enter`] as its very first action, from a plain synchronous
//! `fn main()`, which is how this crate satisfies the "single-threaded
//! at user-namespace entry" constraint that `setns(2)` imposes on
//! joining a different user namespace. Only after `enter` returns a
//! [`Role`] does the caller construct a tokio runtime.
//!
//! Uses a plain `fork()`/`ForkResult` match for the fork step, and the
//! usual open-`/proc/{pid}/ns/{user,net,mnt}`-then-`setns` pattern for
//! joining another process's namespaces.

use crate::{
    cli::Invocation,
    error::Error,
    net::Fd,
};
use nix::{
    fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag},
    sched::{setns, CloneFlags},
    sys::{
        socket::{socketpair, AddressFamily, SockFlag, SockType},
        stat::Mode,
    },
    unistd::{close, dup2, fork, ForkResult, Pid},
};
use std::{
    fs::File,
    os::unix::io::{AsRawFd, RawFd},
};

/// The well-known fd number the listener-handoff socket is duplicated
/// onto in both the child and the parent, so neither side needs an
/// environment variable to find it.
pub const HANDOFF_FD: RawFd = libc::STDERR_FILENO + 1;

/// This process entered the listener (container) side: it creates the
/// listening sockets and hands them off.
#[derive(Debug)]
pub struct ChildSide {
    pub handoff_fd: Fd,
    pub invocation: Invocation,
}

/// This process entered the connect (destination) side: it receives
/// the listening sockets, daemonizes, and runs the relay engine.
#[derive(Debug)]
pub struct ParentSide {
    pub handoff_fd: Fd,
    pub child_pid: Pid,
    pub invocation: Invocation,
}

/// The process role assigned at the pre-fork stage, carried explicitly
/// into every later function instead of being read from global state.
#[derive(Debug)]
pub enum Role {
    Child(ChildSide),
    Parent(ParentSide),
}

/// Run the namespace entry shim.
///
/// Order of operations: open the log fd and redirect
/// stdout/stderr/stdin, create the handoff socket pair, fork, and have
/// each side join its own set of namespaces in user→network→mount
/// order (the kernel requires the user namespace be joined first
/// because later `setns` calls need privileges granted by it).
///
/// Any failure here is fatal: no state outside the process has been
/// created yet, so no cleanup beyond process exit is attempted.
pub fn enter(invocation: Invocation) -> Result<Role, Error> {
    redirect_log(&invocation.log_path).map_err(Error::namespace_entry)?;

    let (parent_half, child_half) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .map_err(Error::from)
    .map_err(Error::namespace_entry)?;

    match unsafe { fork() }.map_err(Error::from).map_err(Error::namespace_entry)? {
        ForkResult::Child => {
            let _ = close(parent_half);

            join_namespaces(invocation.listen_pid).map_err(Error::namespace_entry)?;

            let handoff_fd = install_handoff_fd(child_half).map_err(Error::namespace_entry)?;

            Ok(Role::Child(ChildSide {
                handoff_fd,
                invocation,
            }))
        }
        ForkResult::Parent { child } => {
            let _ = close(child_half);

            join_namespaces(invocation.connect_pid).map_err(Error::namespace_entry)?;

            let handoff_fd = install_handoff_fd(parent_half).map_err(Error::namespace_entry)?;

            Ok(Role::Parent(ParentSide {
                handoff_fd,
                child_pid: child,
                invocation,
            }))
        }
    }
}

/// Join the user, network, and mount namespaces of `pid`, in that
/// order.
fn join_namespaces(pid: Pid) -> Result<(), Error> {
    for (kind, flag) in [
        ("user", CloneFlags::CLONE_NEWUSER),
        ("net", CloneFlags::CLONE_NEWNET),
        ("mnt", CloneFlags::CLONE_NEWNS),
    ] {
        let path = format!("/proc/{}/ns/{}", pid, kind);
        let file = File::open(&path)?;
        setns(file.as_raw_fd(), flag)?;
    }
    Ok(())
}

/// Duplicate `fd` onto [`HANDOFF_FD`] with close-on-exec set, closing
/// the original descriptor.
fn install_handoff_fd(fd: RawFd) -> Result<Fd, Error> {
    let dup = dup2(fd, HANDOFF_FD)?;
    let mut flags = FdFlag::from_bits_truncate(fcntl(dup, FcntlArg::F_GETFD)?);
    flags.insert(FdFlag::FD_CLOEXEC);
    fcntl(dup, FcntlArg::F_SETFD(flags))?;
    if fd != dup {
        let _ = close(fd);
    }
    Ok(Fd::from(dup))
}

/// Open (truncate-create) the log file, redirect stdout/stderr to it,
/// and close stdin.
fn redirect_log(log_path: &std::path::Path) -> Result<(), Error> {
    let log_fd = open(
        log_path,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        Mode::from_bits_truncate(0o640),
    )?;

    dup2(log_fd, libc::STDOUT_FILENO)?;
    dup2(log_fd, libc::STDERR_FILENO)?;
    if log_fd != libc::STDOUT_FILENO && log_fd != libc::STDERR_FILENO {
        let _ = close(log_fd);
    }

    let _ = close(libc::STDIN_FILENO);

    Ok(())
}
