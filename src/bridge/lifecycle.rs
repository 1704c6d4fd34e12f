//! Listener lifecycle: bind and unbind commands, the phase state machine,
//! and the three completion signals handed to the bridge's creator.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::BindRequest;
use crate::deferred::{Deferred, Promise};
use crate::error::BridgeError;
use crate::socket::SocketCommand;

/// Which events are legal. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    AwaitingBind,
    Running,
    Unbinding,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingBind => "awaiting-bind",
            Self::Running => "running",
            Self::Unbinding => "unbinding",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Triggers an unbind and reports when the listener is fully closed.
#[derive(Clone)]
pub struct UnbindHandle {
    trigger: Arc<dyn Fn() + Send + Sync>,
    unbound: Deferred<()>,
}

impl UnbindHandle {
    pub(crate) fn new(trigger: Arc<dyn Fn() + Send + Sync>, unbound: Deferred<()>) -> Self {
        Self { trigger, unbound }
    }

    /// Handle whose trigger does nothing, for listeners that never bound.
    pub(crate) fn noop(unbound: Deferred<()>) -> Self {
        Self::new(Arc::new(|| {}), unbound)
    }

    /// Ask the bridge to close its listener.
    ///
    /// Returns the "fully unbound" result; calling again is harmless and
    /// returns the same result.
    pub fn unbind(&self) -> Deferred<()> {
        (self.trigger)();
        self.unbound.clone()
    }
}

impl fmt::Debug for UnbindHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnbindHandle")
            .field("unbound", &self.unbound.is_resolved())
            .finish_non_exhaustive()
    }
}

/// Promises owned by the coordinator, one per creator-facing signal.
pub(crate) struct LifecycleSignals {
    pub(crate) address: Promise<SocketAddr>,
    pub(crate) unbind: Promise<UnbindHandle>,
    pub(crate) fully_unbound: Promise<()>,
    pub(crate) fully_unbound_view: Deferred<()>,
}

pub(crate) struct Lifecycle {
    phase: Phase,
    endpoint: SocketAddr,
    bound_addr: Option<SocketAddr>,
    unbind_after_bind: bool,
    commands: mpsc::UnboundedSender<SocketCommand>,
    signals: LifecycleSignals,
}

impl Lifecycle {
    pub(crate) fn new(
        endpoint: SocketAddr,
        commands: mpsc::UnboundedSender<SocketCommand>,
        signals: LifecycleSignals,
    ) -> Self {
        Self {
            phase: Phase::AwaitingBind,
            endpoint,
            bound_addr: None,
            unbind_after_bind: false,
            commands,
            signals,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    /// Send the bind command. An unreachable driver counts as a bind failure.
    pub(crate) fn start(&mut self, request: BindRequest) -> Result<(), String> {
        self.commands
            .send(SocketCommand::Bind(request))
            .map_err(|_| "socket driver unavailable".to_string())
    }

    /// The listener is bound. Returns false if the event was not expected.
    pub(crate) fn on_bound(&mut self, addr: SocketAddr, trigger: Arc<dyn Fn() + Send + Sync>) -> bool {
        if self.phase != Phase::AwaitingBind {
            tracing::warn!(phase = %self.phase, address = %addr, "Unexpected bind confirmation");
            return false;
        }
        self.bound_addr = Some(addr);
        self.transition(Phase::Running);
        self.signals.address.succeed(addr);
        self.signals.unbind.succeed(UnbindHandle::new(
            trigger,
            self.signals.fully_unbound_view.clone(),
        ));
        tracing::info!(address = %addr, "Listener bound");

        if self.unbind_after_bind {
            self.request_unbind();
        }
        true
    }

    /// The bind failed. Closes the lifecycle and returns the error to send
    /// downstream.
    pub(crate) fn on_bind_failed(&mut self, reason: String) -> BridgeError {
        let error = BridgeError::BindFailed {
            addr: self.endpoint,
            reason,
        };
        tracing::warn!(error = %error, "Bind failed");
        self.signals.address.fail(error.clone());
        self.signals
            .unbind
            .succeed(UnbindHandle::noop(self.signals.fully_unbound_view.clone()));
        // Nothing was ever bound, so there is nothing left to unbind.
        self.close(Ok(()));
        error
    }

    /// Close the listener if it is open.
    ///
    /// Before the bind completes the request is remembered and acted on
    /// once the listener is bound.
    pub(crate) fn request_unbind(&mut self) {
        match self.phase {
            Phase::AwaitingBind => self.unbind_after_bind = true,
            Phase::Running => {
                if self.commands.send(SocketCommand::Unbind).is_ok() {
                    self.transition(Phase::Unbinding);
                } else {
                    self.close(Err(BridgeError::UnbindFailed(
                        "socket driver unavailable".into(),
                    )));
                }
            }
            Phase::Unbinding | Phase::Closed => {}
        }
    }

    pub(crate) fn on_unbound(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        tracing::info!("Listener unbound");
        self.close(Ok(()));
    }

    pub(crate) fn on_unbind_failed(&mut self, reason: String) {
        if self.phase == Phase::Closed {
            return;
        }
        tracing::warn!(reason = %reason, "Unbind failed");
        self.close(Err(BridgeError::UnbindFailed(reason)));
    }

    /// Forward accept credit to the driver.
    pub(crate) fn send_credit(&self, n: u32) -> Result<(), BridgeError> {
        self.commands
            .send(SocketCommand::AcceptCredit(n))
            .map_err(|_| BridgeError::Connection("accept credit rejected: socket driver unavailable".into()))
    }

    /// Every entry into `Closed` resolves "fully unbound" exactly once.
    fn close(&mut self, outcome: Result<(), BridgeError>) {
        self.transition(Phase::Closed);
        self.signals.fully_unbound.complete(outcome);
    }

    fn transition(&mut self, next: Phase) {
        debug_assert!(next >= self.phase, "phase moved backwards");
        if next != self.phase {
            tracing::debug!(from = %self.phase, to = %next, "Phase transition");
            self.phase = next;
        }
    }
}
