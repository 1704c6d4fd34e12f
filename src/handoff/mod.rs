//! Downstream handoff: publisher, subscriber and the adapter between them
//! and the bridge.
//!
//! Follows the usual demand protocol: the subscriber receives a
//! [`Subscription`] in `on_subscribe`, requests connections through it, and
//! is sent at most that many `on_next` calls followed by at most one
//! terminal signal.

pub mod stream;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::bridge::Message;
use crate::connection::IncomingConnection;
use crate::error::BridgeError;
use crate::flow::demand::DemandState;

pub use stream::IncomingStream;

/// Receives connections from a bridge.
///
/// Callbacks run on the bridge task and must not block.
pub trait Subscriber<Io>: Send + 'static {
    fn on_subscribe(&mut self, subscription: Subscription<Io>);
    fn on_next(&mut self, connection: IncomingConnection<Io>);
    fn on_error(&mut self, error: BridgeError);
    fn on_complete(&mut self);
}

/// Demand and cancel signals from downstream, plus the attach request.
pub(crate) enum DownstreamSignal<Io> {
    Attach {
        subscriber: Box<dyn Subscriber<Io>>,
        subscription: Subscription<Io>,
    },
    Demand(u64),
    Cancel,
}

/// A subscriber's handle for requesting connections.
pub struct Subscription<Io> {
    inbox: mpsc::UnboundedSender<Message<Io>>,
}

impl<Io> Clone for Subscription<Io> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
        }
    }
}

impl<Io> Subscription<Io> {
    /// Ask for `n` more connections.
    pub fn request(&self, n: u64) {
        let _ = self
            .inbox
            .send(Message::Downstream(DownstreamSignal::Demand(n)));
    }

    /// Stop receiving connections. The bridge unbinds its listener.
    pub fn cancel(&self) {
        let _ = self.inbox.send(Message::Downstream(DownstreamSignal::Cancel));
    }
}

/// Publishes a bridge's connections to exactly one subscriber.
///
/// Clones share one claim. When the last clone is dropped without a
/// subscriber ever attaching, the bridge is cancelled and unbinds.
pub struct ConnectionPublisher<Io> {
    claim: Arc<Claim<Io>>,
}

struct Claim<Io> {
    inbox: mpsc::UnboundedSender<Message<Io>>,
    attached: AtomicBool,
}

impl<Io> Drop for Claim<Io> {
    fn drop(&mut self) {
        if !*self.attached.get_mut() {
            tracing::debug!("Publisher dropped without a subscriber");
            let _ = self
                .inbox
                .send(Message::Downstream(DownstreamSignal::Cancel));
        }
    }
}

impl<Io> Clone for ConnectionPublisher<Io> {
    fn clone(&self) -> Self {
        Self {
            claim: Arc::clone(&self.claim),
        }
    }
}

impl<Io: Send + 'static> ConnectionPublisher<Io> {
    pub(crate) fn new(inbox: mpsc::UnboundedSender<Message<Io>>) -> Self {
        Self {
            claim: Arc::new(Claim {
                inbox,
                attached: AtomicBool::new(false),
            }),
        }
    }

    /// Attach the one subscriber.
    ///
    /// A second call fails with [`BridgeError::AlreadySubscribed`] and the
    /// first subscriber is left untouched.
    pub fn subscribe<S: Subscriber<Io>>(&self, subscriber: S) -> Result<(), BridgeError> {
        if self.claim.attached.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadySubscribed);
        }

        let subscription = Subscription {
            inbox: self.claim.inbox.clone(),
        };
        self.claim
            .inbox
            .send(Message::Downstream(DownstreamSignal::Attach {
                subscriber: Box::new(subscriber),
                subscription,
            }))
            .map_err(|_| BridgeError::Released)
    }

    /// Attach a demand-driven stream as the subscriber.
    pub fn into_stream(self) -> Result<IncomingStream<Io>, BridgeError> {
        let (subscriber, stream) = stream::channel();
        self.subscribe(subscriber)?;
        Ok(stream)
    }

    /// Whether a subscriber has been attached.
    pub fn is_subscribed(&self) -> bool {
        self.claim.attached.load(Ordering::SeqCst)
    }
}

enum Terminal {
    Complete,
    Error(BridgeError),
}

/// Bridge-side state of the downstream handoff. Owned by the bridge task.
pub(crate) struct HandoffAdapter<Io> {
    exposed: bool,
    early: VecDeque<DownstreamSignal<Io>>,
    subscriber: Option<Box<dyn Subscriber<Io>>>,
    demand: DemandState,
    terminal: Option<Terminal>,
    terminal_sent: bool,
}

impl<Io: 'static> HandoffAdapter<Io> {
    pub(crate) fn new() -> Self {
        Self {
            exposed: false,
            early: VecDeque::new(),
            subscriber: None,
            demand: DemandState::new(),
            terminal: None,
            terminal_sent: false,
        }
    }

    /// One-time handshake: the publisher may now accept its subscriber.
    ///
    /// The bridge exposes as soon as its task starts, before it reads the
    /// inbox, so signals already queued there are applied directly. The
    /// buffer only holds signals taken in before that point.
    ///
    /// Returns the signals buffered before exposure, in arrival order.
    pub(crate) fn expose(&mut self) -> Vec<DownstreamSignal<Io>> {
        self.exposed = true;
        self.early.drain(..).collect()
    }

    /// Buffer `signal` if not yet exposed, otherwise hand it back to apply.
    pub(crate) fn intake(&mut self, signal: DownstreamSignal<Io>) -> Option<DownstreamSignal<Io>> {
        if self.exposed {
            Some(signal)
        } else {
            self.early.push_back(signal);
            None
        }
    }

    pub(crate) fn attach(
        &mut self,
        mut subscriber: Box<dyn Subscriber<Io>>,
        subscription: Subscription<Io>,
    ) {
        // The publisher admits one subscriber.
        debug_assert!(self.subscriber.is_none() && !self.terminal_sent);
        subscriber.on_subscribe(subscription);
        self.subscriber = Some(subscriber);
        self.flush_terminal();
    }

    pub(crate) fn on_demand(&mut self, n: u64) {
        if n == 0 {
            tracing::warn!("Ignoring request for zero connections");
            return;
        }
        if self.terminal.is_none() {
            self.demand.add(n);
        }
    }

    pub(crate) fn on_cancel(&mut self) {
        self.demand.cancel();
        self.subscriber = None;
    }

    /// The demand gate: a live subscriber that has requested more.
    pub(crate) fn demand_available(&self) -> bool {
        self.subscriber.is_some() && self.terminal.is_none() && self.demand.has_demand()
    }

    /// Emit one connection. Only called after the gates matched.
    pub(crate) fn deliver(&mut self, connection: IncomingConnection<Io>) {
        let taken = self.demand.try_take();
        debug_assert!(taken, "delivery without demand");
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber.on_next(connection);
        }
    }

    /// Terminal success. Returns false if already terminated.
    pub(crate) fn complete(&mut self) -> bool {
        self.terminate(Terminal::Complete)
    }

    /// Terminal error. Returns false if already terminated.
    pub(crate) fn fail(&mut self, error: BridgeError) -> bool {
        self.terminate(Terminal::Error(error))
    }

    fn terminate(&mut self, terminal: Terminal) -> bool {
        if self.terminal.is_some() || self.demand.is_cancelled() {
            return false;
        }
        self.terminal = Some(terminal);
        self.flush_terminal();
        true
    }

    fn flush_terminal(&mut self) {
        if self.terminal_sent {
            return;
        }
        let (Some(subscriber), Some(terminal)) = (self.subscriber.as_mut(), self.terminal.as_ref())
        else {
            return;
        };
        match terminal {
            Terminal::Complete => subscriber.on_complete(),
            Terminal::Error(e) => subscriber.on_error(e.clone()),
        }
        self.terminal_sent = true;
        self.subscriber = None;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.demand.is_cancelled()
    }

    /// Nothing more will ever be sent downstream.
    pub(crate) fn is_finished(&self) -> bool {
        self.terminal_sent || self.demand.is_cancelled()
    }

    #[cfg(test)]
    pub(crate) fn requested(&self) -> u64 {
        self.demand.requested()
    }
}
