//! UNIX-to-UNIX fd-forwarding relay.
//!
//! Used when both endpoints of a session are UNIX sockets: reads a
//! payload plus any `SCM_RIGHTS` ancillary data from one side and
//! writes both through to the other, closing the forwarded fds once
//! they have been handed to the peer. Built directly on
//! [`crate::net`]'s `UnixStreamExt` and ancillary-data machinery, the
//! same pair used by the listener handoff.

use crate::{
    error::Error,
    net::{AncillaryData, SocketAncillary, UnixStream, UnixStreamExt},
};
use std::os::unix::io::RawFd;

const PAYLOAD_BUF: usize = 4096;
const ANCILLARY_BUF: usize = 4096;

/// Pump payload + fds in both directions between `a` and `b` until
/// either side reaches EOF, errors, or a read/write reports a
/// fds-vs-payload mismatch ([`Error::PartialOob`]).
pub async fn relay(a: UnixStream, b: UnixStream) -> Result<(), Error> {
    let a = std::sync::Arc::new(a);
    let b = std::sync::Arc::new(b);

    let forward_a_to_b = pump(a.clone(), b.clone());
    let forward_b_to_a = pump(b, a);

    tokio::try_join!(forward_a_to_b, forward_b_to_a).map(|_| ())
}

async fn pump(src: std::sync::Arc<UnixStream>, dst: std::sync::Arc<UnixStream>) -> Result<(), Error> {
    loop {
        let mut payload = [0u8; PAYLOAD_BUF];
        let mut ancillary_buf = [0u8; ANCILLARY_BUF];

        let (n, fds) = match recv_message(&src, &mut payload, &mut ancillary_buf).await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(err) => return Err(err),
        };

        let forward_result = send_message(&dst, &payload[..n], &fds).await;

        // The kernel duplicated these fds into our address space on
        // receipt; whether the forward succeeded or not, our copies
        // must be closed exactly once.
        for fd in &fds {
            let _ = nix::unistd::close(*fd);
        }

        forward_result?;
    }
}

async fn recv_message(
    stream: &UnixStream,
    payload: &mut [u8],
    ancillary_buf: &mut [u8],
) -> Result<Option<(usize, Vec<RawFd>)>, Error> {
    let mut bufs = [std::io::IoSliceMut::new(payload)];
    let mut ancillary = SocketAncillary::new(ancillary_buf);

    let n = stream
        .recv_vectored_with_ancillary(&mut bufs, &mut ancillary)
        .await
        .map_err(Error::RelayIo)?;

    if n == 0 {
        return Ok(None);
    }

    let mut fds = Vec::new();
    for message in ancillary.messages().flatten() {
        if let AncillaryData::ScmRights(scm_rights) = message {
            fds.extend(scm_rights);
        }
    }

    // `MSG_CTRUNC`: the ancillary buffer was too small to hold every
    // control message the kernel had queued, so at least one fd was
    // dropped without ever reaching this process. Forwarding `fds`
    // unchanged would silently deliver fewer fds than the sender passed,
    // so this message can't be forwarded; close whatever fds did arrive
    // (the kernel already duplicated them into this process) and
    // terminate the session.
    if ancillary.truncated() {
        let received = fds.len();
        for fd in fds {
            let _ = nix::unistd::close(fd);
        }
        return Err(Error::PartialOob(received + 1, received));
    }

    Ok(Some((n, fds)))
}

async fn send_message(stream: &UnixStream, payload: &[u8], fds: &[RawFd]) -> Result<(), Error> {
    let bufs = [std::io::IoSlice::new(payload)];
    let mut ancillary_buf = [0u8; ANCILLARY_BUF];
    let mut ancillary = SocketAncillary::new(&mut ancillary_buf);

    if !fds.is_empty() && !ancillary.add_fds(fds) {
        return Err(Error::PartialOob(fds.len(), 0));
    }

    let n = stream
        .send_vectored_with_ancillary(&bufs, &mut ancillary)
        .await
        .map_err(Error::RelayIo)?;

    if n != payload.len() {
        return Err(Error::PartialOob(payload.len(), n));
    }

    Ok(())
}
