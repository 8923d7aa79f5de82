//! UDP relay.
//!
//! One inbound listening socket, no accept step: each readable event
//! on the listener dials a fresh outbound socket against the connect
//! endpoint and relays that datagram burst through
//! [`generic::relay_datagrams`], then drops the outbound socket.

use crate::{addr::Endpoint, error::Error, net::Fd, relay::generic, shutdown::Supervisor};
use std::os::unix::io::{FromRawFd, IntoRawFd};
use tokio::net::UdpSocket;

#[cfg(feature = "log")]
use forkproxy_log::warn;

/// Run the UDP poll loop to completion. Any I/O error other than a
/// clean shutdown notification fails the whole engine, matching the
/// design's "any error or hangup event fails the whole engine" rule
/// (UDP has no per-session isolation the way stream sessions do).
pub async fn run(listener_fd: Fd, connect_endpoint: Endpoint, supervisor: Supervisor) -> Result<(), Error> {
    let raw = listener_fd.into_raw_fd();
    let std_socket = unsafe { std::net::UdpSocket::from_raw_fd(raw) };
    std_socket.set_nonblocking(true)?;
    let listener = UdpSocket::from_std(std_socket)?;

    let address = &connect_endpoint.addresses[0];

    loop {
        tokio::select! {
            _ = supervisor.notified() => return Ok(()),
            readable = listener.readable() => {
                readable?;

                let mut buf = [0u8; 65536];
                let (n, peer) = match listener.try_recv_from(&mut buf) {
                    Ok(result) => result,
                    Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(err) => return Err(Error::from(err)),
                };

                let destination = match UdpSocket::bind("0.0.0.0:0").await {
                    Ok(socket) => socket,
                    Err(err) => return Err(Error::from(err)),
                };
                if let Err(err) = destination.connect(address).await {
                    #[cfg(feature = "log")]
                    warn!("dial {} failed: {}", address, err);
                    continue;
                }

                generic::relay_datagrams(&listener, peer, &destination, &buf[..n]).await?;
            }
        }
    }
}
