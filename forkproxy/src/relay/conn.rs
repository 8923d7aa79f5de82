//! A connected stream of either transport, so the relay loops can be
//! written once instead of once per transport pair.

use crate::{addr::Transport, error::Error};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpStream, UnixStream},
};

/// Either half of a relayed session: the accepted/dialed TCP stream or
/// the accepted/dialed UNIX stream, whichever the endpoint's
/// [`Transport`] calls for.
pub enum Conn {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Conn {
    /// Connect to `address` under `transport`. UDP has no connection to
    /// dial here; its per-datagram handling lives in [`super::udp`].
    pub async fn dial(transport: Transport, address: &str) -> Result<Self, Error> {
        match transport {
            Transport::Tcp => TcpStream::connect(address)
                .await
                .map(Conn::Tcp)
                .map_err(Error::from)
                .map_err(|err| Error::dial_failed(address, err)),
            Transport::Unix => UnixStream::connect(address)
                .await
                .map(Conn::Unix)
                .map_err(Error::from)
                .map_err(|err| Error::dial_failed(address, err)),
            Transport::Udp => unreachable!("UDP sessions are dialed per-datagram, not via Conn"),
        }
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Conn::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Conn::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Conn::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Conn::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
