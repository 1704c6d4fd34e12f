//! Downstream demand accounting.

/// Elements the subscriber has requested but not yet received, plus the
/// cancellation flag.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemandState {
    requested: u64,
    cancelled: bool,
}

impl DemandState {
    /// Create a demand state with nothing requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add demand, saturating at `u64::MAX`.
    ///
    /// Returns the new total. Demand added after cancellation is dropped.
    pub fn add(&mut self, amount: u64) -> u64 {
        if !self.cancelled {
            self.requested = self.requested.saturating_add(amount);
        }
        self.requested
    }

    /// Try to take one unit of demand for a delivery.
    ///
    /// Returns true if demand was available.
    pub fn try_take(&mut self) -> bool {
        if !self.has_demand() {
            return false;
        }
        self.requested -= 1;
        true
    }

    /// Mark the subscriber cancelled and drop outstanding demand.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.requested = 0;
    }

    /// Whether at least one element may be delivered.
    pub fn has_demand(&self) -> bool {
        !self.cancelled && self.requested > 0
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
