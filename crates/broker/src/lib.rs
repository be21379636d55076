//! RabbitMQ session lifecycle for the compression queue.
//!
//! [`session::BrokerSession`] owns the connection and channel, declares the
//! durable work queue, and drives publishing and manual-acknowledgment
//! consumption. The processing decision itself lives behind the
//! [`handler::JobHandler`] seam: a handler returns an explicit
//! [`handler::JobOutcome`] and the session alone performs the matching
//! protocol action.

pub mod handler;
pub mod session;

pub use handler::{JobHandler, JobOutcome};
pub use session::{BrokerError, BrokerSession, QueueInfo, SessionState};
