//! Test utilities for bridge tests.
//!
//! Provides:
//! - A scripted socket driver the test drives by hand
//! - A recording subscriber
//! - Polling helpers

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;

use tcp_sluice::connection::IncomingConnection;
use tcp_sluice::error::BridgeError;
use tcp_sluice::handoff::{Subscriber, Subscription};
use tcp_sluice::socket::{
    CommandReceiver, EventSink, RawConnection, SocketCommand, SocketDriver, SocketEvent,
};

/// How long to wait for something that should happen.
pub const PATIENCE: Duration = Duration::from_secs(2);

/// How long to wait before concluding something did not happen.
pub const QUIET: Duration = Duration::from_millis(100);

/// Socket driver that hands its channels to the test.
pub struct ScriptedDriver {
    handle: oneshot::Sender<DriverHandle>,
}

/// The test's side of a [`ScriptedDriver`].
pub struct DriverHandle {
    pub commands: CommandReceiver,
    pub events: EventSink<DuplexStream>,
}

pub fn scripted() -> (ScriptedDriver, oneshot::Receiver<DriverHandle>) {
    let (handle, rx) = oneshot::channel();
    (ScriptedDriver { handle }, rx)
}

impl SocketDriver for ScriptedDriver {
    type Io = DuplexStream;

    fn start(self, commands: CommandReceiver, events: EventSink<DuplexStream>) {
        let _ = self.handle.send(DriverHandle { commands, events });
    }
}

impl DriverHandle {
    /// Next command from the bridge, failing the test if none arrives.
    pub async fn expect_command(&mut self) -> SocketCommand {
        tokio::time::timeout(PATIENCE, self.commands.recv())
            .await
            .expect("timed out waiting for a socket command")
            .expect("bridge dropped its command channel")
    }

    /// Assert the bridge sends nothing for a while.
    pub async fn expect_quiet(&mut self) {
        if let Ok(Some(command)) = tokio::time::timeout(QUIET, self.commands.recv()).await {
            panic!("unexpected socket command: {command:?}");
        }
    }

    pub fn send(&self, event: SocketEvent<DuplexStream>) {
        assert!(self.events.send(event), "bridge inbox closed");
    }

    /// Deliver an accepted connection from `peer_port`; returns the client end.
    pub fn accept(&self, peer_port: u16) -> DuplexStream {
        let (server, client) = tokio::io::duplex(1024);
        self.send(SocketEvent::Accepted(RawConnection {
            io: server,
            local_addr: local_addr(),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], peer_port)),
        }));
        client
    }
}

pub fn local_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7070))
}

/// What a [`Recorder`] observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Subscribed,
    Next(u16),
    Error(BridgeError),
    Complete,
}

/// Subscriber that records every callback and keeps delivered connections.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
    connections: Arc<Mutex<Vec<IncomingConnection<DuplexStream>>>>,
    subscription: Arc<Mutex<Option<Subscription<DuplexStream>>>>,
}

impl Recorder {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn deliveries(&self) -> usize {
        self.seen()
            .iter()
            .filter(|s| matches!(s, Seen::Next(_)))
            .count()
    }

    pub fn terminals(&self) -> usize {
        self.seen()
            .iter()
            .filter(|s| matches!(s, Seen::Error(_) | Seen::Complete))
            .count()
    }

    pub fn take_connection(&self) -> Option<IncomingConnection<DuplexStream>> {
        self.connections.lock().unwrap().pop()
    }

    pub fn request(&self, n: u64) {
        self.subscription
            .lock()
            .unwrap()
            .as_ref()
            .expect("not subscribed")
            .request(n);
    }

    pub fn cancel(&self) {
        self.subscription
            .lock()
            .unwrap()
            .as_ref()
            .expect("not subscribed")
            .cancel();
    }

    /// Wait until `n` callbacks have been recorded.
    pub async fn wait_for_events(&self, n: usize) {
        let seen = self.seen.clone();
        assert!(
            wait_for(PATIENCE, || seen.lock().unwrap().len() >= n).await,
            "expected {n} subscriber events, got {:?}",
            self.seen()
        );
    }
}

impl Subscriber<DuplexStream> for Recorder {
    fn on_subscribe(&mut self, subscription: Subscription<DuplexStream>) {
        *self.subscription.lock().unwrap() = Some(subscription);
        self.seen.lock().unwrap().push(Seen::Subscribed);
    }

    fn on_next(&mut self, connection: IncomingConnection<DuplexStream>) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Next(connection.remote_addr().port()));
        self.connections.lock().unwrap().push(connection);
    }

    fn on_error(&mut self, error: BridgeError) {
        self.seen.lock().unwrap().push(Seen::Error(error));
    }

    fn on_complete(&mut self) {
        self.seen.lock().unwrap().push(Seen::Complete);
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Arguments
///
/// * `timeout` - Maximum time to wait
/// * `condition` - Closure that returns true when condition is met
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
