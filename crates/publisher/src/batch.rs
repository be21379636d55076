//! Paced batch publishing.
//!
//! Descriptors are published in input order, in fixed-size groups, with a
//! short delay between jobs and a longer pause between groups. The pacing
//! is a throttle against bursty load on the broker and consumers, not a
//! correctness requirement.

use std::time::Duration;

use async_trait::async_trait;

use squish_broker::{BrokerError, BrokerSession};
use squish_core::{CoreError, JobDescriptor, JobEnvelope};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_INTER_JOB_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub inter_job_delay: Duration,
    pub inter_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_job_delay: DEFAULT_INTER_JOB_DELAY,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Destination for built envelopes. Implemented by [`BrokerSession`];
/// tests substitute a recording sink.
#[async_trait]
pub trait JobSink: Send {
    async fn publish(&mut self, envelope: &JobEnvelope) -> Result<(), BrokerError>;
}

#[async_trait]
impl JobSink for BrokerSession {
    async fn publish(&mut self, envelope: &JobEnvelope) -> Result<(), BrokerError> {
        BrokerSession::publish(self, envelope).await
    }
}

/// Build and publish every descriptor, paced per [`BatchConfig`].
///
/// Envelopes are returned in publish order. The first validation or
/// broker failure aborts the run; everything already published stays
/// published (at-least-once, no rollback).
pub async fn publish_batch<S: JobSink>(
    sink: &mut S,
    descriptors: &[JobDescriptor],
    config: &BatchConfig,
) -> Result<Vec<JobEnvelope>, PublishError> {
    let batch_size = config.batch_size.max(1);
    let total = descriptors.len();
    let batch_count = total.div_ceil(batch_size);
    let mut published = Vec::with_capacity(total);

    for (batch_index, batch) in descriptors.chunks(batch_size).enumerate() {
        tracing::info!(
            batch = batch_index + 1,
            batches = batch_count,
            jobs = batch.len(),
            "Publishing batch",
        );

        for (job_index, descriptor) in batch.iter().enumerate() {
            let envelope = JobEnvelope::from_descriptor(descriptor.clone())?;
            sink.publish(&envelope).await?;
            published.push(envelope);

            if job_index + 1 < batch.len() {
                tokio::time::sleep(config.inter_job_delay).await;
            }
        }

        let remaining = total - published.len();
        if remaining > 0 {
            tracing::debug!(
                delay_ms = config.inter_batch_delay.as_millis() as u64,
                remaining,
                "Pausing before next batch",
            );
            tokio::time::sleep(config.inter_batch_delay).await;
        }
    }

    tracing::info!(count = published.len(), "All jobs published");
    Ok(published)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
