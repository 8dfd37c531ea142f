#![deny(missing_docs)]
//! Launchpad agents runtime.
//!
//! Transport-agnostic turn handling: acknowledgement, rate gating, skill
//! dispatch, error recovery and the periodic background tasks.

/// Outbound delivery seam implemented by transports.
pub mod outbox;
/// Turn pipeline and background tasks.
pub mod runtime;

pub use outbox::{InboundMessage, Outbox};
pub use runtime::{AgentRuntime, APOLOGY};
