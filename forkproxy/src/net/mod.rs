//! File descriptor passing and ancillary (OOB) data handling for
//! `AF_UNIX` sockets.

mod ancillary;
mod fd;
mod stream;

pub use ancillary::{AncillaryData, ScmRights, SocketAncillary};
pub use fd::Fd;
pub use stream::{StdUnixStreamExt, UnixStream, UnixStreamExt};
