//! Tokio TCP socket driver.
//!
//! Runs as its own task. Binds with `socket2` so the backlog and socket
//! options are honoured, then accepts exactly one connection per credit.
//! Without credit the listener is not polled and the kernel queue fills.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

use super::{CommandReceiver, EventSink, RawConnection, SocketCommand, SocketDriver, SocketEvent};
use crate::config::{BindRequest, SocketOptions};

/// Socket driver backed by `tokio::net::TcpListener`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDriver;

impl SocketDriver for TcpDriver {
    type Io = TcpStream;

    fn start(self, commands: CommandReceiver, events: EventSink<TcpStream>) {
        tokio::spawn(run_driver(commands, events));
    }
}

/// Create, configure, bind and listen a socket for `request`.
pub fn bind_listener(request: &BindRequest) -> io::Result<TcpListener> {
    let addr = request.local_endpoint();
    let options = request.options();

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if options.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() && options.only_v6 {
        socket.set_only_v6(true)?;
    }
    socket.bind(&SockAddr::from(addr))?;

    let Ok(backlog) = i32::try_from(request.backlog()) else {
        return Err(io::Error::other("Invalid socket listen backlog value"));
    };
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    TcpListener::from_std(std::net::TcpListener::from(socket))
}

enum Step {
    Command(Option<SocketCommand>),
    Accepted(io::Result<(TcpStream, SocketAddr)>),
}

async fn accept_on(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn run_driver(mut commands: CommandReceiver, events: EventSink<TcpStream>) {
    let mut listener: Option<(TcpListener, SocketOptions)> = None;
    let mut credit: u32 = 0;

    loop {
        let step = tokio::select! {
            command = commands.recv() => Step::Command(command),
            accepted = accept_on(listener.as_ref().map(|(l, _)| l)), if credit > 0 => {
                Step::Accepted(accepted)
            }
        };

        match step {
            // Bridge dropped its command sender: it is gone.
            Step::Command(None) => break,
            Step::Command(Some(SocketCommand::Bind(request))) => {
                if listener.is_some() {
                    events.send(SocketEvent::BindFailed("listener already bound".into()));
                    continue;
                }
                match bind_listener(&request).and_then(|l| Ok((l.local_addr()?, l))) {
                    Ok((addr, bound)) => {
                        tracing::debug!(address = %addr, backlog = request.backlog(), "Listener bound");
                        listener = Some((bound, request.options()));
                        events.send(SocketEvent::BoundAt(addr));
                    }
                    Err(e) => {
                        tracing::debug!(address = %request.local_endpoint(), error = %e, "Bind failed");
                        events.send(SocketEvent::BindFailed(e.to_string()));
                        break;
                    }
                }
            }
            Step::Command(Some(SocketCommand::AcceptCredit(n))) => {
                credit = credit.saturating_add(n);
            }
            Step::Command(Some(SocketCommand::Unbind)) => {
                if listener.take().is_some() {
                    tracing::debug!("Listener closed");
                    events.send(SocketEvent::Unbound);
                } else {
                    events.send(SocketEvent::UnbindFailed("listener not bound".into()));
                }
                break;
            }
            Step::Accepted(result) => {
                credit -= 1;
                let Some((bound, options)) = listener.as_ref() else {
                    continue;
                };
                let event = match result.and_then(|(io, peer_addr)| {
                    io.set_nodelay(options.nodelay)?;
                    Ok(RawConnection {
                        local_addr: io.local_addr().or_else(|_| bound.local_addr())?,
                        io,
                        peer_addr,
                    })
                }) {
                    Ok(connection) => SocketEvent::Accepted(connection),
                    Err(e) => SocketEvent::AcceptFailed(e.to_string()),
                };
                if !events.send(event) {
                    break;
                }
            }
        }
    }
}
