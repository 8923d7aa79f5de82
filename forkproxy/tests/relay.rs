//! Integration tests for the relay engine's per-session building blocks.
//!
//! These exercise `GenericRelay`, `UnixOOBRelay`, and the UDP datagram
//! burst helper directly against loopback sockets, mirroring the
//! round-trip laws: bytes sent into one side of a session arrive
//! unmodified at the other, and forwarded UNIX fds refer to the same
//! kernel object. Namespace entry, handoff, and daemonize are not
//! covered here — they need root and live PID namespaces to exercise.

use forkproxy::{
    net::{AncillaryData, SocketAncillary, StdUnixStreamExt, UnixStream},
    relay::{conn::Conn, generic, unix_oob},
};
use std::{
    io::{self, IoSlice, IoSliceMut},
    os::unix::{
        io::AsRawFd,
        net::UnixStream as StdUnixStream,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
};

#[tokio::test(flavor = "multi_thread")]
async fn generic_relay_forwards_tcp_bytes_both_ways() -> io::Result<()> {
    let backend_listener = TcpListener::bind("127.0.0.1:0").await?;
    let backend_addr = backend_listener.local_addr()?;
    let proxy_listener = TcpListener::bind("127.0.0.1:0").await?;
    let proxy_addr = proxy_listener.local_addr()?;

    let (source, mut client) = tokio::try_join!(
        async { Ok::<_, io::Error>(proxy_listener.accept().await?.0) },
        TcpStream::connect(proxy_addr),
    )?;
    let (mut backend, destination) = tokio::try_join!(
        async { Ok::<_, io::Error>(backend_listener.accept().await?.0) },
        TcpStream::connect(backend_addr),
    )?;

    let relay_task = tokio::spawn(generic::relay(Conn::Tcp(source), Conn::Tcp(destination)));

    client.write_all(b"ping").await?;
    let mut buf = [0u8; 4];
    backend.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"ping");

    backend.write_all(b"pong").await?;
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"pong");

    drop(client);
    drop(backend);
    relay_task
        .await
        .unwrap()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unix_oob_relay_forwards_payload_and_fd() -> io::Result<()> {
    let (client, proxy_source) = StdUnixStream::pair()?;
    let (proxy_destination, backend) = StdUnixStream::pair()?;
    proxy_source.set_nonblocking(true)?;
    proxy_destination.set_nonblocking(true)?;

    let proxy_source = UnixStream::from_std(proxy_source)?;
    let proxy_destination = UnixStream::from_std(proxy_destination)?;

    let relay_task = tokio::spawn(unix_oob::relay(proxy_source, proxy_destination));

    // Any open fd works as the payload; a throwaway TCP listener keeps
    // the test free of filesystem cleanup.
    let passed = std::net::TcpListener::bind("127.0.0.1:0")?;
    let passed_fd = passed.as_raw_fd();
    let passed_local_addr = passed.local_addr()?;

    let payload = b"hello";
    let bufs = [IoSlice::new(payload)];
    let mut ancillary_buf = [0u8; 128];
    let mut ancillary = SocketAncillary::new(&mut ancillary_buf);
    assert!(ancillary.add_fds(&[passed_fd]));
    client.send_vectored_with_ancillary(&bufs, &mut ancillary)?;

    let (received_payload, received_fds) = tokio::task::spawn_blocking(move || {
        let mut payload_buf = [0u8; 64];
        let mut bufs = [IoSliceMut::new(&mut payload_buf)];
        let mut ancillary_buf = [0u8; 128];
        let mut ancillary = SocketAncillary::new(&mut ancillary_buf);
        let n = backend.recv_vectored_with_ancillary(&mut bufs, &mut ancillary)?;

        let mut fds = Vec::new();
        for message in ancillary.messages().flatten() {
            if let AncillaryData::ScmRights(scm_rights) = message {
                fds.extend(scm_rights);
            }
        }
        Ok::<_, io::Error>((payload_buf[..n].to_vec(), fds))
    })
    .await
    .unwrap()?;

    assert_eq!(received_payload, payload);
    assert_eq!(received_fds.len(), 1);

    // The received fd refers to the same kernel object as the one sent:
    // binding the passed listener's duplicate shows the same local address.
    let reconstituted = unsafe {
        use std::os::unix::io::FromRawFd;
        std::net::TcpListener::from_raw_fd(received_fds[0])
    };
    assert_eq!(reconstituted.local_addr()?, passed_local_addr);

    drop(client);
    relay_task
        .await
        .unwrap()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn udp_datagram_burst_forwards_both_ways() -> io::Result<()> {
    let listener = UdpSocket::bind("127.0.0.1:0").await?;
    let listener_addr = listener.local_addr()?;

    let backend = UdpSocket::bind("127.0.0.1:0").await?;
    let backend_addr = backend.local_addr()?;

    let destination = UdpSocket::bind("127.0.0.1:0").await?;
    destination.connect(backend_addr).await?;

    let client = UdpSocket::bind("127.0.0.1:0").await?;
    client.send_to(b"ping", listener_addr).await?;

    let mut buf = [0u8; 64];
    let (n, peer) = listener.recv_from(&mut buf).await?;
    let initial = buf[..n].to_vec();

    let relay_task = tokio::spawn(async move {
        generic::relay_datagrams(&listener, peer, &destination, &initial).await
    });

    let mut backend_buf = [0u8; 64];
    let (n, from) = backend.recv_from(&mut backend_buf).await?;
    assert_eq!(&backend_buf[..n], b"ping");

    backend.send_to(b"pong", from).await?;

    let mut client_buf = [0u8; 64];
    let (n, _) = client.recv_from(&mut client_buf).await?;
    assert_eq!(&client_buf[..n], b"pong");

    relay_task
        .await
        .unwrap()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    Ok(())
}
