//! Flow control accounting.
//!
//! Provides:
//! - Accept credit extended to the socket driver (upstream)
//! - Demand granted by the subscriber (downstream)

pub mod credit;
pub mod demand;
