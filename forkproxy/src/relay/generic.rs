//! Generic byte-stream relay.
//!
//! Used for every session that does not need `SCM_RIGHTS` forwarding:
//! plain TCP, plain UNIX stream sockets, and the per-datagram UDP path.
//! Runs one copy loop per direction concurrently; `tokio::io::copy`
//! already retries transparently on `WouldBlock`, the same behavior
//! [`crate::net::UnixStreamExt`] implements explicitly for the OOB
//! path.

use crate::{error::Error, relay::conn::Conn};
use tokio::{io::AsyncWriteExt, net::UdpSocket};

/// Relay bytes in both directions between `source` and `destination`
/// until one side reaches EOF or errors, then close both. Used for the
/// TCP/UNIX stream sessions, where the session always owns both ends;
/// the UDP per-datagram path has its own transient-destination handling
/// in [`relay_datagrams`].
pub async fn relay(source: Conn, destination: Conn) -> Result<(), Error> {
    let (mut source_rd, mut source_wr) = tokio::io::split(source);
    let (mut dest_rd, mut dest_wr) = tokio::io::split(destination);

    let to_destination = tokio::io::copy(&mut source_rd, &mut dest_wr);
    let to_source = tokio::io::copy(&mut dest_rd, &mut source_wr);

    let result = tokio::try_join!(to_destination, to_source);

    let _ = dest_wr.shutdown().await;
    let _ = source_wr.shutdown().await;

    result.map(|_| ()).map_err(Error::RelayIo)
}

/// Forward the single triggering datagram from `listener` to
/// `destination`, then keep forwarding replies and further datagrams
/// from the same peer until neither side has more queued, using short
/// idle timeouts to detect the end of the burst.
pub async fn relay_datagrams(
    listener: &UdpSocket,
    peer: std::net::SocketAddr,
    destination: &UdpSocket,
    initial: &[u8],
) -> Result<(), Error> {
    use std::time::Duration;
    use tokio::time::timeout;

    const IDLE: Duration = Duration::from_millis(200);

    destination.send(initial).await.map_err(Error::RelayIo)?;

    let mut buf = [0u8; 65536];
    loop {
        tokio::select! {
            result = timeout(IDLE, destination.recv(&mut buf)) => {
                match result {
                    Ok(Ok(n)) => {
                        listener.send_to(&buf[..n], peer).await.map_err(Error::RelayIo)?;
                    }
                    Ok(Err(err)) => return Err(Error::RelayIo(err)),
                    Err(_) => break,
                }
            }
            result = timeout(IDLE, listener.recv_from(&mut buf)) => {
                match result {
                    Ok(Ok((n, from))) if from == peer => {
                        destination.send(&buf[..n]).await.map_err(Error::RelayIo)?;
                    }
                    Ok(Ok(_)) => continue,
                    Ok(Err(err)) => return Err(Error::RelayIo(err)),
                    Err(_) => break,
                }
            }
        }
    }

    Ok(())
}
