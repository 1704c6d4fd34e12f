//! The listen-and-credit bridge.
//!
//! [`bind`] spawns one actor task per listener. The actor owns every piece
//! of mutable state (phase, the pending connection, demand, credit) and is
//! reached only through its inbox, so events from the socket driver, the
//! subscriber and the unbind handle are processed one at a time in arrival
//! order.

mod lifecycle;
mod pump;

pub use lifecycle::{Phase, UnbindHandle};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::config::BindRequest;
use crate::deferred::{self, Deferred};
use crate::error::BridgeError;
use crate::flow::credit::AcceptCredit;
use crate::handoff::{ConnectionPublisher, DownstreamSignal, HandoffAdapter};
use crate::observability::metrics;
use crate::socket::tcp::TcpDriver;
use crate::socket::{EventSink, RawConnection, SocketDriver, SocketEvent};
use lifecycle::{Lifecycle, LifecycleSignals};

/// Everything the bridge inbox carries.
pub(crate) enum Message<Io> {
    Socket(SocketEvent<Io>),
    Downstream(DownstreamSignal<Io>),
    Unbind,
}

/// What the creator of a bridge gets back.
pub struct Binding<Io> {
    /// Publisher of accepted connections; takes exactly one subscriber.
    pub publisher: ConnectionPublisher<Io>,
    /// The bound address, or the bind error.
    pub local_addr: Deferred<SocketAddr>,
    /// Unbind trigger, available once the bind attempt has finished.
    pub unbind: Deferred<UnbindHandle>,
    /// Resolves once the listener is closed.
    pub fully_unbound: Deferred<()>,
}

/// Start a bridge for `request` on `driver`.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn bind<D: SocketDriver>(request: BindRequest, driver: D) -> Binding<D::Io> {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let (address, local_addr) = deferred::pair();
    let (unbind_promise, unbind) = deferred::pair();
    let (unbound_promise, fully_unbound) = deferred::pair();
    let signals = LifecycleSignals {
        address,
        unbind: unbind_promise,
        fully_unbound: unbound_promise,
        fully_unbound_view: fully_unbound.clone(),
    };

    driver.start(command_rx, EventSink::new(inbox_tx.clone()));

    let actor = BridgeActor {
        id: crate::generate_bridge_id(),
        listener: request.local_endpoint().to_string(),
        inbox: inbox_rx,
        weak_inbox: inbox_tx.downgrade(),
        lifecycle: Lifecycle::new(request.local_endpoint(), command_tx, signals),
        credit: AcceptCredit::new(),
        pending: None,
        handoff: HandoffAdapter::new(),
    };
    tokio::spawn(actor.run(request));

    Binding {
        publisher: ConnectionPublisher::new(inbox_tx),
        local_addr,
        unbind,
        fully_unbound,
    }
}

/// Start a bridge on a tokio TCP listener.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn bind_tcp(request: BindRequest) -> Binding<TcpStream> {
    bind(request, TcpDriver)
}

pub(crate) struct BridgeActor<Io> {
    id: String,
    listener: String,
    inbox: mpsc::UnboundedReceiver<Message<Io>>,
    weak_inbox: mpsc::WeakUnboundedSender<Message<Io>>,
    lifecycle: Lifecycle,
    credit: AcceptCredit,
    pending: Option<RawConnection<Io>>,
    handoff: HandoffAdapter<Io>,
}

impl<Io: Send + 'static> BridgeActor<Io> {
    async fn run(mut self, request: BindRequest) {
        let span = tracing::info_span!("bridge", id = %self.id, listener = %self.listener);
        async move {
            if let Err(reason) = self.lifecycle.start(request) {
                let error = self.lifecycle.on_bind_failed(reason);
                self.handoff.fail(error);
            }
            for signal in self.handoff.expose() {
                self.apply_downstream(signal);
            }
            self.pump();

            while !self.is_released() {
                let Some(message) = self.inbox.recv().await else {
                    tracing::debug!("All bridge handles dropped");
                    break;
                };
                self.handle(message);
                self.pump();
            }
            tracing::debug!(
                phase = %self.lifecycle.phase(),
                bound = ?self.lifecycle.bound_addr(),
                credits = self.credit.issued_total(),
                "Bridge released"
            );
        }
        .instrument(span)
        .await;
    }

    /// Closed, and downstream has been told everything it will be told.
    fn is_released(&self) -> bool {
        self.lifecycle.phase() == Phase::Closed && self.handoff.is_finished()
    }

    fn handle(&mut self, message: Message<Io>) {
        match message {
            Message::Socket(event) => self.handle_socket(event),
            Message::Downstream(signal) => {
                if let Some(signal) = self.handoff.intake(signal) {
                    self.apply_downstream(signal);
                }
            }
            Message::Unbind => {
                tracing::debug!("Unbind requested");
                self.cancel_listener();
            }
        }
    }

    fn handle_socket(&mut self, event: SocketEvent<Io>) {
        match event {
            SocketEvent::BoundAt(addr) => {
                let inbox = self.weak_inbox.clone();
                let trigger: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                    if let Some(inbox) = inbox.upgrade() {
                        let _ = inbox.send(Message::Unbind);
                    }
                });
                self.lifecycle.on_bound(addr, trigger);
            }
            SocketEvent::BindFailed(reason) => {
                if self.lifecycle.phase() != Phase::AwaitingBind {
                    tracing::warn!(reason = %reason, "Unexpected bind failure");
                    return;
                }
                let error = self.lifecycle.on_bind_failed(reason);
                self.credit.revoke();
                self.handoff.fail(error);
            }
            SocketEvent::Accepted(connection) => self.on_accepted(connection),
            SocketEvent::AcceptFailed(reason) => {
                self.fail(BridgeError::Connection(format!("accept failed: {reason}")));
            }
            SocketEvent::Unbound => {
                self.lifecycle.on_unbound();
                self.credit.revoke();
            }
            SocketEvent::UnbindFailed(reason) => {
                self.lifecycle.on_unbind_failed(reason);
                self.credit.revoke();
                self.drop_pending();
                // Surfaced on "fully unbound" only; the stream ends normally.
                self.handoff.complete();
            }
        }
    }

    fn on_accepted(&mut self, connection: RawConnection<Io>) {
        let phase = self.lifecycle.phase();
        if !matches!(phase, Phase::Running | Phase::Unbinding) {
            tracing::warn!(phase = %phase, peer = %connection.peer_addr, "Dropping connection accepted outside a bound phase");
            return;
        }

        let had_credit = self.credit.consume();
        if self.pending.is_some() {
            self.fail(BridgeError::Connection(
                "listener delivered a connection while one was pending".into(),
            ));
            return;
        }
        if !had_credit {
            tracing::debug!(peer = %connection.peer_addr, "Connection accepted without outstanding credit");
        }

        tracing::debug!(peer = %connection.peer_addr, "Connection accepted");
        metrics::record_accepted(&self.listener);
        metrics::record_pending(&self.listener, true);
        self.pending = Some(connection);
    }

    fn apply_downstream(&mut self, signal: DownstreamSignal<Io>) {
        match signal {
            DownstreamSignal::Attach {
                subscriber,
                subscription,
            } => {
                tracing::debug!("Subscriber attached");
                self.handoff.attach(subscriber, subscription);
            }
            DownstreamSignal::Demand(n) => self.handoff.on_demand(n),
            DownstreamSignal::Cancel => {
                tracing::debug!("Subscriber cancelled");
                self.handoff.on_cancel();
            }
        }
    }

    /// Stop issuing credit and close the listener if it is still open.
    fn cancel_listener(&mut self) {
        self.credit.revoke();
        self.lifecycle.request_unbind();
    }

    fn drop_pending(&mut self) {
        if let Some(connection) = self.pending.take() {
            tracing::debug!(peer = %connection.peer_addr, "Dropping pending connection");
            metrics::record_pending(&self.listener, false);
        }
    }

    /// The single failure path: cancel the listener, send the error
    /// downstream once, release whatever is pending.
    fn fail(&mut self, error: BridgeError) {
        tracing::error!(error = %error, "Bridge failed");
        self.cancel_listener();
        self.drop_pending();
        self.handoff.fail(error);
    }
}
