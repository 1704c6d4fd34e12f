//! Accept credit extended to the socket driver.
//!
//! - At most one credit is ever outstanding
//! - Owned by the bridge actor, so plain fields instead of atomics

/// Accept credit balance for one listener.
///
/// A credit authorises the socket driver to deliver its next accepted
/// connection. Capping the balance at one means the driver never holds more
/// than one undelivered connection; everything else waits in the kernel
/// accept queue.
#[derive(Debug, Default)]
pub struct AcceptCredit {
    outstanding: u32,
    revoked: bool,
    issued_total: u64,
}

/// Maximum number of credits outstanding at once.
pub const MAX_OUTSTANDING: u32 = 1;

impl AcceptCredit {
    /// Create a balance with nothing outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue one credit if none is outstanding and issuance is not revoked.
    ///
    /// Returns true if a credit was issued; the caller must forward it to
    /// the driver.
    pub fn try_issue(&mut self) -> bool {
        if self.revoked || self.outstanding >= MAX_OUTSTANDING {
            return false;
        }
        self.outstanding += 1;
        self.issued_total += 1;
        true
    }

    /// Consume the outstanding credit for an accepted connection.
    ///
    /// Returns false if the driver delivered without holding a credit.
    pub fn consume(&mut self) -> bool {
        if self.outstanding == 0 {
            return false;
        }
        self.outstanding -= 1;
        true
    }

    /// Cancel the outstanding credit and stop issuing for good.
    ///
    /// Returns the number of credits cancelled.
    pub fn revoke(&mut self) -> u32 {
        self.revoked = true;
        std::mem::take(&mut self.outstanding)
    }

    /// Get the current outstanding credit count.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Whether issuance has been stopped.
    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Credits issued over the lifetime of the listener.
    pub fn issued_total(&self) -> u64 {
        self.issued_total
    }
}
