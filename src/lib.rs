//! tcp-sluice: a TCP accept-queue bridge with credit-based flow control.
//!
//! The bridge sits between a listening socket and a single demand-driven
//! subscriber. Connections are released downstream one at a time, only when
//! the subscriber has asked for them, while the listener is granted at most
//! one accept credit so the kernel backlog absorbs bursts instead of the
//! process.
//!
//! # Architecture
//!
//! - **Actor-owned state**: one task owns phase, pending connection, demand
//!   and credit; everything else talks to it through its inbox
//! - **Credit-Based Accepts**: the socket driver may deliver one connection
//!   per credit, and at most one credit is ever outstanding
//! - **Demand-Driven Handoff**: a connection moves downstream only when both
//!   the connection gate and the demand gate are open
//! - **Observable**: tracing spans and OpenTelemetry metrics
//!
//! # Modules
//!
//! - [`bridge`]: Bridge actor, lifecycle state machine and the pump
//! - [`config`]: CLI/environment configuration and bind requests
//! - [`connection`]: Connection handles and lazy byte flows
//! - [`deferred`]: Single-assignment deferred results
//! - [`error`]: Bridge error taxonomy
//! - [`flow`]: Accept credit and downstream demand accounting
//! - [`handoff`]: Publisher/subscriber handoff and the stream adapter
//! - [`observability`]: Metrics and tracing setup
//! - [`server`]: Echo server built on the bridge
//! - [`socket`]: Socket driver interface and the tokio TCP driver
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use tcp_sluice::bridge;
//! use tcp_sluice::config::BindRequest;
//!
//! # async fn run() -> Result<(), tcp_sluice::error::BridgeError> {
//! let binding = bridge::bind_tcp(BindRequest::new("127.0.0.1:0".parse().unwrap()));
//! let addr = binding.local_addr.wait().await?;
//! println!("listening on {addr}");
//!
//! let mut incoming = binding.publisher.into_stream()?;
//! while let Some(conn) = incoming.next().await {
//!     let conn = conn?;
//!     conn.into_flow().join(|mut rd, mut wr| async move {
//!         tokio::io::copy(&mut rd, &mut wr).await
//!     });
//! }
//! # Ok(())
//! # }
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // bridge::BridgeError is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc,      // Panic docs can be verbose
    clippy::too_many_lines           // Some functions are inherently long
)]

pub mod bridge;
pub mod config;
pub mod connection;
pub mod deferred;
pub mod error;
pub mod flow;
pub mod handoff;
pub mod observability;
pub mod server;
pub mod socket;

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) bridge identifier.
///
/// Every bridge instance carries one in its tracing span so interleaved
/// logs from several listeners can be told apart.
///
/// # Example
///
/// ```
/// let id = tcp_sluice::generate_bridge_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_bridge_id() -> String {
    Uuid::now_v7().to_string()
}
