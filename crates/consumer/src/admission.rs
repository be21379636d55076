//! Admission control: gate each delivery on GPU readiness, run the
//! engine, and decide the acknowledgment.
//!
//! The controller reads readiness as non-blocking snapshots from a
//! [`StatusSource`]. When the GPU exists but is busy it waits on a bounded
//! poll loop with a monotonic deadline; on timeout the job proceeds anyway
//! — degraded throughput is preferred over a wedged queue. Every failure
//! path resolves to [`JobOutcome::Nack`] without requeue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use squish_broker::{JobHandler, JobOutcome};
use squish_core::outcome::format_bytes;
use squish_core::JobEnvelope;
use squish_gpu::StatusSource;

use crate::engine::CompressionEngine;
use crate::joblog::JobLog;

/// How often the wait loop re-reads the readiness snapshot.
pub const GPU_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-delivery coordinator between the queue, the GPU monitor, and the
/// compression engine.
pub struct AdmissionController {
    status: Arc<dyn StatusSource>,
    engine: Arc<dyn CompressionEngine>,
    job_log: JobLog,
    wait_timeout: Duration,
}

impl AdmissionController {
    pub fn new(
        status: Arc<dyn StatusSource>,
        engine: Arc<dyn CompressionEngine>,
        job_log: JobLog,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            status,
            engine,
            job_log,
            wait_timeout,
        }
    }

    /// Block until the GPU is ready, reported absent, or the wait budget
    /// runs out. The deadline is checked against a monotonic clock before
    /// every sleep, so the loop overruns the budget by at most one poll
    /// interval.
    async fn wait_for_gpu(&self) {
        let deadline = tokio::time::Instant::now() + self.wait_timeout;

        loop {
            let status = self.status.status();
            if status.ready || !status.available {
                tracing::info!("GPU ready for processing");
                return;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    budget_ms = self.wait_timeout.as_millis() as u64,
                    "GPU wait timeout, proceeding with current state",
                );
                return;
            }

            tracing::debug!("Still waiting for GPU");
            tokio::time::sleep(GPU_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl JobHandler for AdmissionController {
    async fn handle(&self, payload: &[u8]) -> JobOutcome {
        let job = match JobEnvelope::from_bytes(payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, "Discarding malformed job payload");
                self.job_log.record_failure("unparseable", &e.to_string()).await;
                return JobOutcome::Nack;
            }
        };

        tracing::info!(
            job_id = %job.id,
            file = %job.original_name,
            published_at = %job.timestamp,
            "Job received",
        );

        let status = self.status.status();
        if status.available && !status.ready {
            tracing::info!(job_id = %job.id, "GPU busy, waiting for availability");
            self.wait_for_gpu().await;
        }

        // A fresh snapshot after the wait decides the engine hint; the
        // admission decision itself has already been made.
        let status = self.status.status();
        let use_gpu = status.available && status.ready;
        tracing::info!(
            job_id = %job.id,
            mode = if use_gpu { "gpu" } else { "cpu" },
            "Processing job",
        );

        match self.engine.compress(&job, use_gpu).await {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %job.id,
                    original = %format_bytes(outcome.original_size_bytes),
                    compressed = %format_bytes(outcome.compressed_size_bytes),
                    ratio_percent = %format!("{:.2}", outcome.compression_ratio_percent()),
                    time_ms = outcome.processing_time_ms,
                    "Job completed",
                );
                self.job_log.record_success(&job, &outcome, use_gpu).await;
                JobOutcome::Ack
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job processing failed");
                self.job_log
                    .record_failure(&job.id.to_string(), &e.to_string())
                    .await;
                JobOutcome::Nack
            }
        }
    }
}
