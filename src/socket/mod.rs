//! Socket driver interface.
//!
//! The bridge never touches sockets itself. It sends [`SocketCommand`]s to a
//! driver and receives [`SocketEvent`]s back through an [`EventSink`] that
//! feeds the bridge inbox. [`tcp::TcpDriver`] is the tokio implementation.

pub mod tcp;

use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::bridge::Message;
use crate::config::BindRequest;

/// Commands from the bridge to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Bind and listen. Answered by `BoundAt` or `BindFailed`.
    Bind(BindRequest),
    /// Permission to deliver this many more accepted connections.
    AcceptCredit(u32),
    /// Close the listener. Answered by `Unbound` or `UnbindFailed`.
    Unbind,
}

/// Events from the driver to the bridge.
#[derive(Debug)]
pub enum SocketEvent<Io> {
    BoundAt(SocketAddr),
    BindFailed(String),
    Accepted(RawConnection<Io>),
    AcceptFailed(String),
    Unbound,
    UnbindFailed(String),
}

/// An accepted connection that has not been handed downstream yet.
#[derive(Debug)]
pub struct RawConnection<Io> {
    pub io: Io,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
}

/// Receiving end of the bridge's command channel, given to the driver.
pub type CommandReceiver = mpsc::UnboundedReceiver<SocketCommand>;

/// Delivers driver events into the bridge inbox.
pub struct EventSink<Io> {
    inbox: mpsc::UnboundedSender<Message<Io>>,
}

impl<Io> Clone for EventSink<Io> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
        }
    }
}

impl<Io> EventSink<Io> {
    pub(crate) fn new(inbox: mpsc::UnboundedSender<Message<Io>>) -> Self {
        Self { inbox }
    }

    /// Deliver an event. Returns false once the bridge has been released.
    pub fn send(&self, event: SocketEvent<Io>) -> bool {
        self.inbox.send(Message::Socket(event)).is_ok()
    }
}

/// A socket collaborator the bridge can drive.
///
/// `start` is called once, from inside a tokio runtime, before the bridge
/// sends its `Bind` command. The driver owns the listener and must answer
/// every `Bind` and `Unbind` with exactly one event.
pub trait SocketDriver: Send + 'static {
    /// Byte stream type of accepted connections.
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn start(self, commands: CommandReceiver, events: EventSink<Self::Io>);
}
