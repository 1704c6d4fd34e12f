//! Connection handles handed to the subscriber.
//!
//! Building a handle does no I/O: it is the peer metadata plus a [`Flow`]
//! that only touches the socket once a pipeline is joined to it.

use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::socket::RawConnection;

/// An accepted connection released by the bridge.
#[derive(Debug)]
pub struct IncomingConnection<Io> {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    flow: Flow<Io>,
}

impl<Io> IncomingConnection<Io> {
    /// Wrap a raw accepted connection.
    pub fn from_raw(raw: RawConnection<Io>) -> Self {
        Self {
            local_addr: raw.local_addr,
            remote_addr: raw.peer_addr,
            flow: Flow {
                io: raw.io,
                peer: raw.peer_addr,
            },
        }
    }

    /// Local address the connection was accepted on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the remote peer.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Take the byte flow of this connection.
    pub fn into_flow(self) -> Flow<Io> {
        self.flow
    }
}

/// The bidirectional byte flow of a connection, not yet materialised.
#[derive(Debug)]
pub struct Flow<Io> {
    io: Io,
    peer: SocketAddr,
}

impl<Io> Flow<Io>
where
    Io: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Attach a processing pipeline and run it on its own task.
    ///
    /// The pipeline receives the read and write halves of the connection.
    /// The task runs inside a `connection` span carrying the peer address.
    pub fn join<F, Fut>(self, pipeline: F) -> JoinHandle<Fut::Output>
    where
        F: FnOnce(ReadHalf<Io>, WriteHalf<Io>) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let span = tracing::info_span!("connection", peer = %self.peer);
        let (reader, writer) = tokio::io::split(self.io);
        tokio::spawn(pipeline(reader, writer).instrument(span))
    }
}

impl<Io> Flow<Io> {
    /// The raw I/O object, for callers that wire it up themselves.
    pub fn into_inner(self) -> Io {
        self.io
    }
}
