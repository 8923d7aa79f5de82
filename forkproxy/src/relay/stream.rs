//! Accept loop for TCP and UNIX stream listeners.
//!
//! Accepts on every listener the handoff produced concurrently — one
//! task per listener fanning into a single channel, so every address a
//! listen endpoint expanded to is actually reachable. Each accepted
//! connection is dialed against the connect endpoint and handed to
//! whichever relay its transport pair needs.

use crate::{
    addr::{Endpoint, Transport},
    error::Error,
    net::Fd,
    relay::{conn::Conn, generic, unix_oob},
    shutdown::Supervisor,
};
use std::os::unix::io::{FromRawFd, IntoRawFd};
use tokio::{
    net::{TcpListener, UnixListener},
    sync::mpsc,
};

#[cfg(feature = "log")]
use forkproxy_log::{info, warn};

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// Run the accept loop to completion (either `supervisor` observes
/// `SIGTERM`, or every listener task has exited because its listener
/// was closed).
pub async fn run(
    listeners: Vec<Fd>,
    listen_transport: Transport,
    connect_endpoint: Endpoint,
    supervisor: Supervisor,
) -> Result<(), Error> {
    let listeners = listeners
        .into_iter()
        .map(|fd| to_listener(fd, listen_transport))
        .collect::<Result<Vec<_>, Error>>()?;

    let (tx, mut rx) = mpsc::channel(32);

    for listener in listeners {
        let tx = tx.clone();
        let supervisor = supervisor.clone();
        tokio::spawn(accept_loop(listener, tx, supervisor));
    }
    // Drop our own sender so the channel closes once every accept task
    // has exited (relevant only if all listeners close without SIGTERM).
    drop(tx);

    loop {
        tokio::select! {
            _ = supervisor.notified() => return Ok(()),
            accepted = rx.recv() => {
                match accepted {
                    Some(source) => {
                        let connect_endpoint = connect_endpoint.clone();
                        tokio::spawn(handle_connection(source, connect_endpoint));
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Accept in a loop, racing every `accept` against the shutdown
/// notification so a SIGTERM actually unblocks this task instead of
/// waiting for the whole runtime to be torn down at process exit. The
/// `listener` is owned solely by this task, so returning here — on
/// either branch — drops and closes its fd, which is the Shutdown
/// Supervisor's "closes all listener fds" (spec §4.6) as realized for
/// an async accept loop: the supervisor wakes every such task, and each
/// one closes the fd it alone owns.
async fn accept_loop(listener: Listener, tx: mpsc::Sender<Conn>, supervisor: Supervisor) {
    loop {
        tokio::select! {
            _ = supervisor.notified() => return,
            accepted = accept(&listener) => {
                match accepted {
                    Ok(conn) => {
                        if tx.send(conn).await.is_err() {
                            return;
                        }
                    }
                    Err(_) if supervisor.is_terminating() => return,
                    Err(_err) => {
                        #[cfg(feature = "log")]
                        warn!("accept failed: {}", _err);
                    }
                }
            }
        }
    }
}

async fn accept(listener: &Listener) -> std::io::Result<Conn> {
    match listener {
        Listener::Tcp(l) => l.accept().await.map(|(stream, _)| Conn::Tcp(stream)),
        Listener::Unix(l) => l.accept().await.map(|(stream, _)| Conn::Unix(stream)),
    }
}

async fn handle_connection(source: Conn, connect_endpoint: Endpoint) {
    let address = &connect_endpoint.addresses[0];
    let destination = match Conn::dial(connect_endpoint.transport, address).await {
        Ok(destination) => destination,
        Err(_err) => {
            #[cfg(feature = "log")]
            warn!("dial {} failed: {}", address, _err);
            return;
        }
    };

    let result = match (&source, &destination) {
        (Conn::Unix(_), Conn::Unix(_)) => {
            let (source, destination) = match (source, destination) {
                (Conn::Unix(a), Conn::Unix(b)) => (a, b),
                _ => unreachable!(),
            };
            unix_oob::relay(source, destination).await
        }
        _ => generic::relay(source, destination).await,
    };

    if let Err(_err) = result {
        #[cfg(feature = "log")]
        info!("session ended: {}", _err);
    }
}

fn to_listener(fd: Fd, transport: Transport) -> Result<Listener, Error> {
    let raw = fd.into_raw_fd();
    match transport {
        Transport::Tcp => {
            let std_listener = unsafe { std::net::TcpListener::from_raw_fd(raw) };
            std_listener.set_nonblocking(true)?;
            Ok(Listener::Tcp(TcpListener::from_std(std_listener)?))
        }
        Transport::Unix => {
            let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(raw) };
            std_listener.set_nonblocking(true)?;
            Ok(Listener::Unix(UnixListener::from_std(std_listener)?))
        }
        Transport::Udp => unreachable!("UDP listeners are handled by relay::udp"),
    }
}
