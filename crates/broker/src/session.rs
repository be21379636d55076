//! Connection, channel, and consumer lifecycle against RabbitMQ.
//!
//! The session moves through `Disconnected → Connected → Consuming` and
//! back. [`BrokerSession::connect`] failures are startup-fatal for the
//! process (supervision restarts it); everything per-message is isolated
//! inside the consume loop, and [`BrokerSession::disconnect`] is
//! best-effort so a partially failed teardown never blocks process exit.

use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio_util::sync::CancellationToken;

use squish_core::JobEnvelope;

use crate::handler::{JobHandler, JobOutcome};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT_DELIVERY: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Failed to connect to broker at {url}: {source}")]
    Connection { url: String, source: lapin::Error },

    #[error("Broker session not connected")]
    NotConnected,

    #[error("Broker operation failed: {0}")]
    Protocol(#[from] lapin::Error),

    #[error("Failed to serialize job envelope: {0}")]
    Serialize(#[from] squish_core::CoreError),
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Consuming,
}

/// Point-in-time queue statistics from a passive declare.
#[derive(Debug, Clone, Copy)]
pub struct QueueInfo {
    pub message_count: u32,
    pub consumer_count: u32,
}

/// One process's session against the work queue.
///
/// Owned by a single task; never shared across processes. The channel
/// prefetch bounds how many unacknowledged deliveries are in flight at
/// once (1 by default, i.e. strictly sequential processing).
pub struct BrokerSession {
    url: String,
    queue_name: String,
    prefetch_count: u16,
    state: SessionState,
    connection: Option<Connection>,
    channel: Option<Channel>,
    consumer: Option<Consumer>,
    consumer_tag: Option<String>,
}

impl BrokerSession {
    pub fn new(url: impl Into<String>, queue_name: impl Into<String>, prefetch_count: u16) -> Self {
        Self {
            url: url.into(),
            queue_name: queue_name.into(),
            prefetch_count,
            state: SessionState::Disconnected,
            connection: None,
            channel: None,
            consumer: None,
            consumer_tag: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Open the connection and channel and declare the durable queue.
    ///
    /// Declaring an already-existing durable queue with the same arguments
    /// is a no-op on the broker side, so connect is safe to run from both
    /// the publisher and any number of consumers.
    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        tracing::info!(url = %self.url, queue = %self.queue_name, "Connecting to RabbitMQ");

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|source| BrokerError::Connection {
                url: self.url.clone(),
                source,
            })?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|source| BrokerError::Connection {
                url: self.url.clone(),
                source,
            })?;

        channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Connection {
                url: self.url.clone(),
                source,
            })?;

        self.connection = Some(connection);
        self.channel = Some(channel);
        self.state = SessionState::Connected;
        tracing::info!("Connected to RabbitMQ");
        Ok(())
    }

    /// Publish one envelope with the persistent-delivery flag set.
    ///
    /// No publisher-confirm handshake: the call returns once the frame is
    /// written, which is the at-least-once delivery guarantee this system
    /// accepts.
    pub async fn publish(&self, envelope: &JobEnvelope) -> Result<(), BrokerError> {
        let channel = self.channel.as_ref().ok_or(BrokerError::NotConnected)?;
        let payload = envelope.to_bytes()?;

        let _confirm = channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY),
            )
            .await?;

        tracing::info!(job_id = %envelope.id, queue = %self.queue_name, "Job published");
        Ok(())
    }

    /// Set the prefetch limit and register the consumer (manual ack).
    pub async fn start_consumer(&mut self) -> Result<(), BrokerError> {
        let channel = self.channel.as_ref().ok_or(BrokerError::NotConnected)?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                &self.queue_name,
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.consumer_tag = Some(consumer.tag().as_str().to_string());
        self.consumer = Some(consumer);
        self.state = SessionState::Consuming;
        tracing::info!(
            queue = %self.queue_name,
            prefetch = self.prefetch_count,
            "Queue consumer started",
        );
        Ok(())
    }

    /// Drive the consume loop until cancelled or the stream ends.
    ///
    /// Deliveries are handled strictly one at a time; the handler's
    /// [`JobOutcome`] decides the protocol action, and a nack never
    /// requeues. Cancellation is observed between deliveries only, so an
    /// in-flight job always runs to completion before shutdown proceeds.
    pub async fn run(
        &mut self,
        handler: Arc<dyn JobHandler>,
        cancel: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let consumer = self.consumer.as_mut().ok_or(BrokerError::NotConnected)?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Consumer loop cancelled");
                    return Ok(());
                }
                next = consumer.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            let outcome = handler.handle(&delivery.data).await;
                            let result = match outcome {
                                JobOutcome::Ack => delivery.ack(BasicAckOptions::default()).await,
                                JobOutcome::Nack => {
                                    delivery
                                        .nack(BasicNackOptions {
                                            requeue: false,
                                            ..Default::default()
                                        })
                                        .await
                                }
                            };
                            if let Err(e) = result {
                                tracing::error!(error = %e, ?outcome, "Failed to settle delivery");
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Delivery stream error");
                            return Err(BrokerError::Protocol(e));
                        }
                        None => {
                            tracing::warn!("Delivery stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Cancel the consumer registration. Best-effort and idempotent;
    /// `Consuming → Connected`.
    pub async fn stop_consumer(&mut self) {
        if self.state != SessionState::Consuming {
            return;
        }

        if let (Some(channel), Some(tag)) = (self.channel.as_ref(), self.consumer_tag.take()) {
            if let Err(e) = channel
                .basic_cancel(&tag, BasicCancelOptions::default())
                .await
            {
                tracing::warn!(error = %e, "Error cancelling consumer");
            } else {
                tracing::info!("Queue consumer stopped");
            }
        }

        self.consumer = None;
        self.state = SessionState::Connected;
    }

    /// Passive queue stats (message and consumer counts).
    pub async fn queue_info(&self) -> Result<QueueInfo, BrokerError> {
        let channel = self.channel.as_ref().ok_or(BrokerError::NotConnected)?;

        let queue = channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(QueueInfo {
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    /// Close channel then connection, catching and logging failures at
    /// each step independently so teardown never blocks process exit.
    /// Idempotent.
    pub async fn disconnect(&mut self) {
        self.stop_consumer().await;

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close(200, "Goodbye").await {
                tracing::warn!(error = %e, "Error closing channel");
            }
        }

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(200, "Goodbye").await {
                tracing::warn!(error = %e, "Error closing connection");
            }
        }

        if self.state != SessionState::Disconnected {
            tracing::info!("Disconnected from RabbitMQ");
        }
        self.state = SessionState::Disconnected;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use squish_core::JobDescriptor;

    use super::*;

    fn session() -> BrokerSession {
        BrokerSession::new("amqp://localhost:5672", "image_compression_queue", 1)
    }

    #[test]
    fn new_session_is_disconnected() {
        assert_eq!(session().state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn publish_before_connect_is_rejected() {
        let env = JobEnvelope::from_descriptor(JobDescriptor::new("/in/a.jpg")).unwrap();
        assert_matches!(
            session().publish(&env).await,
            Err(BrokerError::NotConnected)
        );
    }

    #[tokio::test]
    async fn start_consumer_before_connect_is_rejected() {
        assert_matches!(
            session().start_consumer().await,
            Err(BrokerError::NotConnected)
        );
    }

    #[tokio::test]
    async fn queue_info_before_connect_is_rejected() {
        assert_matches!(session().queue_info().await, Err(BrokerError::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_when_disconnected_is_a_noop() {
        let mut s = session();
        s.disconnect().await;
        s.disconnect().await;
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn stop_consumer_when_not_consuming_is_a_noop() {
        let mut s = session();
        s.stop_consumer().await;
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_to_unreachable_broker_fails_with_connection_error() {
        let mut s = BrokerSession::new("amqp://127.0.0.1:1", "image_compression_queue", 1);
        let err = s.connect().await.unwrap_err();
        assert_matches!(err, BrokerError::Connection { .. });
        assert_eq!(s.state(), SessionState::Disconnected);
    }
}
