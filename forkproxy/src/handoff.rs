//! Listener Handoff.
//!
//! The child (which joined the listener's namespaces) creates one
//! listening socket per address of the listen endpoint and sends each
//! one to the parent over [`HANDOFF_FD`](crate::nsenter::HANDOFF_FD)
//! using `SCM_RIGHTS`; the parent (which joined the connect
//! namespaces) receives them back in the same order and reconstitutes
//! them into usable listeners.
//!
//! The `SCM_RIGHTS` transfer itself reuses the
//! `SocketAncillary`/`StdUnixStreamExt` machinery in [`crate::net`] —
//! this code runs before any async runtime exists, so it uses the
//! blocking (`Std*`) half of that API rather than the tokio one.

use crate::{
    addr::Transport,
    error::Error,
    net::{AncillaryData, Fd, SocketAncillary, StdUnixStreamExt},
    nsenter::{ChildSide, ParentSide},
};
use nix::sys::socket::{
    bind, listen, socket, AddressFamily, SockAddr, SockFlag, SockProtocol, SockType, UnixAddr,
};
use std::{
    io::{self, IoSlice, IoSliceMut},
    net::{TcpListener, UdpSocket},
    os::unix::{
        io::{FromRawFd, IntoRawFd, RawFd},
        net::UnixStream,
    },
    thread,
    time::Duration,
};

const BIND_RETRIES: u32 = 10;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(500);

impl ChildSide {
    /// Create a listening fd for every address in the listen endpoint
    /// and send them over the handoff socket in order, then exit.
    pub fn create_and_send(self) -> Result<(), Error> {
        let ChildSide {
            handoff_fd,
            invocation,
        } = self;
        let listen_addr = &invocation.listen_addr;

        if listen_addr.transport == Transport::Unix && !listen_addr.abstract_socket {
            let path = &listen_addr.addresses[0];
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(Error::handoff_failed(err)),
            }
        }

        let stream = unsafe { UnixStream::from_raw_fd(handoff_fd.into_raw_fd()) };

        for address in &listen_addr.addresses {
            let fd = create_listener(listen_addr.transport, address, listen_addr.abstract_socket)
                .map_err(|err| Error::bind_failed(address.clone(), err))?;
            send_fd(&stream, fd).map_err(Error::handoff_failed)?;
            // `send_fd` duplicated the descriptor into the message; close our copy.
            let _ = nix::unistd::close(fd);
        }

        Ok(())
    }
}

impl ParentSide {
    /// Receive exactly as many fds as the listen endpoint has
    /// addresses, in order, closing the handoff socket once done.
    pub fn receive_all(self) -> Result<(Vec<Fd>, nix::unistd::Pid, crate::cli::Invocation), Error> {
        let ParentSide {
            handoff_fd,
            child_pid,
            invocation,
        } = self;
        let expected = invocation.listen_addr.addresses.len();

        let stream = unsafe { UnixStream::from_raw_fd(handoff_fd.into_raw_fd()) };

        let mut fds = Vec::with_capacity(expected);
        for _ in 0..expected {
            match recv_fd(&stream) {
                Ok(fd) => fds.push(fd),
                Err(err) => return Err(Error::handoff_failed(err)),
            }
        }

        Ok((fds, child_pid, invocation))
    }
}

/// Create a listening socket for `address` under `transport`, retrying
/// up to [`BIND_RETRIES`] times with [`BIND_RETRY_DELAY`] between
/// attempts to tolerate transient `EADDRINUSE` during container
/// startup.
fn create_listener(transport: Transport, address: &str, abstract_socket: bool) -> Result<RawFd, Error> {
    let mut attempt = 0;
    loop {
        let result: Result<RawFd, Error> = match transport {
            Transport::Tcp => TcpListener::bind(address)
                .map(IntoRawFd::into_raw_fd)
                .map_err(Error::from),
            Transport::Udp => UdpSocket::bind(address)
                .map(IntoRawFd::into_raw_fd)
                .map_err(Error::from),
            Transport::Unix => bind_unix_stream(address, abstract_socket).map_err(Error::from),
        };

        match result {
            Ok(fd) => return Ok(fd),
            Err(err) if attempt + 1 < BIND_RETRIES && is_addr_in_use(&err) => {
                attempt += 1;
                thread::sleep(BIND_RETRY_DELAY);
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_addr_in_use(err: &Error) -> bool {
    match err {
        Error::IoError(io_err) => io_err.kind() == io::ErrorKind::AddrInUse,
        Error::UnixError(nix_err) => nix_err.as_errno() == Some(nix::errno::Errno::EADDRINUSE),
        _ => false,
    }
}

/// Bind (and, for stream sockets, listen on) a UNIX socket, supporting
/// both path-backed and abstract addresses — `std::os::unix::net`
/// cannot express abstract sockets, so this goes through raw `nix`
/// socket calls.
fn bind_unix_stream(path: &str, abstract_socket: bool) -> nix::Result<RawFd> {
    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None::<SockProtocol>,
    )?;

    let addr = if abstract_socket {
        UnixAddr::new_abstract(path.as_bytes())?
    } else {
        UnixAddr::new(path)?
    };

    bind(fd, &SockAddr::Unix(addr))?;
    listen(fd, 128)?;

    Ok(fd)
}

/// Send `fd` over `stream` as a single `SCM_RIGHTS` control message
/// with a one-byte payload.
fn send_fd(stream: &UnixStream, fd: RawFd) -> io::Result<()> {
    let payload = [0u8; 1];
    let bufs = [IoSlice::new(&payload)];

    let mut ancillary_buf = [0u8; 128];
    let mut ancillary = SocketAncillary::new(&mut ancillary_buf[..]);
    if !ancillary.add_fds(&[fd]) {
        return Err(io::Error::new(io::ErrorKind::Other, "fd ancillary buffer too small"));
    }

    let n = stream.send_vectored_with_ancillary(&bufs, &mut ancillary)?;
    if n != payload.len() {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "short handoff write"));
    }
    Ok(())
}

/// Receive one fd sent by [`send_fd`].
fn recv_fd(stream: &UnixStream) -> io::Result<Fd> {
    let mut payload = [0u8; 1];
    let mut bufs = [IoSliceMut::new(&mut payload)];

    let mut ancillary_buf = [0u8; 128];
    let mut ancillary = SocketAncillary::new(&mut ancillary_buf[..]);

    let n = stream.recv_vectored_with_ancillary(&mut bufs, &mut ancillary)?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "handoff socket closed before all listeners arrived",
        ));
    }

    for message in ancillary.messages().flatten() {
        if let AncillaryData::ScmRights(scm_rights) = message {
            if let Some(fd) = scm_rights.into_iter().next() {
                return Ok(Fd::from(fd));
            }
        }
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "expected an fd in handoff message, got none",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn round_trips_an_fd_over_a_socketpair() {
        let (a, b) = UnixStream::pair().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let fd = listener.as_raw_fd();

        send_fd(&a, fd).unwrap();
        let received = recv_fd(&b).unwrap();

        // Duped fd refers to the same kernel object: binding info matches.
        let reconstituted = unsafe { TcpListener::from_raw_fd(received.into_raw_fd()) };
        assert_eq!(
            reconstituted.local_addr().unwrap(),
            listener.local_addr().unwrap()
        );
    }
}
