//! The processing seam between the broker session and job execution.

use async_trait::async_trait;

/// Terminal disposition of one delivery.
///
/// `Nack` permanently discards the message (requeue is never requested):
/// a failing job must not loop back into the queue, so recovery from
/// failures is driven from the failure log instead of redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Remove the message from the queue; the job is done.
    Ack,
    /// Discard the message without redelivery; the job failed terminally.
    Nack,
}

/// Processes one delivery payload and decides its disposition.
///
/// Implementations must map every internal failure — malformed payload,
/// engine error — to [`JobOutcome::Nack`] rather than panicking or
/// returning an error: the acknowledgment decision is data, not control
/// flow, and only the session talks to the protocol.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> JobOutcome;
}
