//! Relay Engine.
//!
//! Dispatches the daemonized process onto the accept loop ([`stream`])
//! or the datagram poll loop ([`udp`]) depending on the listen
//! endpoint's transport, running concurrently with the
//! [`crate::shutdown::Supervisor`] until `SIGTERM`.

pub mod conn;
pub mod generic;
mod stream;
mod udp;
pub mod unix_oob;

use crate::{addr::Transport, daemonize::Grandchild, error::Error, shutdown::Supervisor};
use std::io;

/// Run the relay engine to completion.
pub async fn run(grandchild: Grandchild, supervisor: Supervisor) -> Result<(), Error> {
    let Grandchild {
        listeners,
        invocation,
    } = grandchild;

    match invocation.listen_addr.transport {
        Transport::Udp => {
            // One poll loop per expanded port, same fan-out the stream
            // accept loop uses for its listeners.
            let mut handles = Vec::with_capacity(listeners.len());
            for listener_fd in listeners {
                let connect_addr = invocation.connect_addr.clone();
                let supervisor = supervisor.clone();
                handles.push(tokio::spawn(udp::run(listener_fd, connect_addr, supervisor)));
            }
            for handle in handles {
                handle
                    .await
                    .map_err(|err| Error::RelayIo(io::Error::new(io::ErrorKind::Other, err)))??;
            }
            Ok(())
        }
        transport => stream::run(listeners, transport, invocation.connect_addr, supervisor).await,
    }
}
