//! Append-only result and failure records.
//!
//! Successes land in `compression.log`, terminal failures in `errors.log`.
//! Because nacked messages are never redelivered, the failure log is the
//! recovery path for lost jobs — write failures are logged and swallowed
//! so record-keeping can never take down the consumer loop.

use std::path::PathBuf;

use chrono::Utc;
use tokio::io::AsyncWriteExt;

use squish_core::outcome::format_bytes;
use squish_core::{CompressionOutcome, JobEnvelope};

const RESULT_LOG: &str = "compression.log";
const ERROR_LOG: &str = "errors.log";

/// File-backed job record under a log directory.
#[derive(Debug, Clone)]
pub struct JobLog {
    dir: PathBuf,
}

impl JobLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record a completed job.
    pub async fn record_success(
        &self,
        job: &JobEnvelope,
        outcome: &CompressionOutcome,
        used_gpu: bool,
    ) {
        let line = format!(
            "{} - SUCCESS - Job: {}, Mode: {}, Original: {}, Compressed: {}, Ratio: {:.2}%, Time: {:.2}s\n",
            Utc::now().to_rfc3339(),
            job.id,
            if used_gpu { "GPU" } else { "CPU" },
            format_bytes(outcome.original_size_bytes),
            format_bytes(outcome.compressed_size_bytes),
            outcome.compression_ratio_percent(),
            outcome.processing_time_ms as f64 / 1000.0,
        );
        self.append(RESULT_LOG, &line).await;
    }

    /// Record a terminally-failed job (or an unparseable payload, with
    /// `job_id` set to a placeholder).
    pub async fn record_failure(&self, job_id: &str, error: &str) {
        let line = format!(
            "{} - ERROR - Job: {}, Error: {}\n",
            Utc::now().to_rfc3339(),
            job_id,
            error,
        );
        self.append(ERROR_LOG, &line).await;
    }

    async fn append(&self, file: &str, line: &str) {
        let path = self.dir.join(file);
        let result = async {
            let mut f = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            f.write_all(line.as_bytes()).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write job log entry");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
