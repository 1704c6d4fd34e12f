//! The demand matcher.
//!
//! Predicates are pure functions of bridge state; [`BridgeActor::pump`] is
//! the single place that acts on them, run after every inbox message.

use super::lifecycle::Phase;
use super::BridgeActor;
use crate::connection::IncomingConnection;
use crate::observability::metrics;

/// The two readiness conditions of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Gates {
    pub(crate) connection_available: bool,
    pub(crate) demand_available: bool,
}

impl Gates {
    pub(crate) fn open(self) -> bool {
        self.connection_available && self.demand_available
    }
}

/// Credit may go out only while running with nothing pending.
pub(crate) fn may_issue_credit(phase: Phase, pending: bool) -> bool {
    phase == Phase::Running && !pending
}

/// The listener is closed and nothing is left to hand off.
pub(crate) fn inputs_depleted(phase: Phase, pending: bool) -> bool {
    phase == Phase::Closed && !pending
}

impl<Io: Send + 'static> BridgeActor<Io> {
    fn gates(&self) -> Gates {
        Gates {
            connection_available: self.pending.is_some(),
            demand_available: self.handoff.demand_available(),
        }
    }

    /// Re-evaluate after a state change: at most one transfer, then credit,
    /// then termination.
    pub(super) fn pump(&mut self) {
        if self.gates().open() {
            self.transfer();
        }
        self.replenish_credit();
        self.finish_if_done();
    }

    fn transfer(&mut self) {
        let Some(raw) = self.pending.take() else {
            return;
        };
        metrics::record_pending(&self.listener, false);
        // Credit is reissued before the handle is published.
        self.replenish_credit();
        if !self.handoff.demand_available() {
            tracing::debug!(peer = %raw.peer_addr, "Bridge failed during handoff, dropping connection");
            return;
        }

        tracing::debug!(peer = %raw.peer_addr, "Handing off connection");
        self.handoff.deliver(IncomingConnection::from_raw(raw));
        metrics::record_delivered(&self.listener);
    }

    fn replenish_credit(&mut self) {
        if !may_issue_credit(self.lifecycle.phase(), self.pending.is_some()) {
            return;
        }
        if !self.credit.try_issue() {
            return;
        }
        match self.lifecycle.send_credit(1) {
            Ok(()) => {
                tracing::trace!(issued = self.credit.issued_total(), "Accept credit issued");
                metrics::record_credit_issued(&self.listener);
            }
            Err(e) => self.fail(e),
        }
    }

    fn finish_if_done(&mut self) {
        if self.handoff.is_cancelled() {
            if self.lifecycle.phase() < Phase::Unbinding {
                tracing::debug!("Subscriber cancelled, closing listener");
            }
            self.cancel_listener();
            self.drop_pending();
        } else if inputs_depleted(self.lifecycle.phase(), self.pending.is_some()) && self.handoff.complete() {
            tracing::debug!("Connection source depleted, completing downstream");
        }
    }
}
