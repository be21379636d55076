//! Publisher configuration from environment variables.

use std::time::Duration;

use squish_core::job::DEFAULT_QUALITY;
use squish_core::ImageFormat;

use crate::batch::BatchConfig;

/// Runtime configuration for the job publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Broker URL (default: `amqp://localhost:5672`).
    pub rabbit_url: String,
    /// Durable work queue name (default: `image_compression_queue`).
    pub queue_name: String,
    /// Batch sizing and pacing.
    pub batch: BatchConfig,
    /// Quality applied when the CLI does not override it.
    pub default_quality: u8,
    /// Format applied when the CLI does not override it.
    pub default_format: ImageFormat,
    pub default_width: Option<u32>,
    pub default_height: Option<u32>,
}

impl PublisherConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var            | Default                   |
    /// |--------------------|---------------------------|
    /// | `RABBITMQ_URL`     | `amqp://localhost:5672`   |
    /// | `QUEUE_NAME`       | `image_compression_queue` |
    /// | `BATCH_SIZE`       | `10`                      |
    /// | `PUBLISH_INTERVAL` | `1000` (ms, between batches) |
    /// | `DEFAULT_QUALITY`  | `80`                      |
    /// | `DEFAULT_FORMAT`   | `jpeg`                    |
    /// | `DEFAULT_WIDTH`    | unset                     |
    /// | `DEFAULT_HEIGHT`   | unset                     |
    pub fn from_env() -> Self {
        let rabbit_url =
            std::env::var("RABBITMQ_URL").unwrap_or_else(|_| "amqp://localhost:5672".into());

        let queue_name =
            std::env::var("QUEUE_NAME").unwrap_or_else(|_| "image_compression_queue".into());

        let batch_size: usize = std::env::var("BATCH_SIZE")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("BATCH_SIZE must be a positive integer");

        let inter_batch_ms: u64 = std::env::var("PUBLISH_INTERVAL")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("PUBLISH_INTERVAL must be milliseconds");

        let default_quality: u8 = std::env::var("DEFAULT_QUALITY")
            .unwrap_or_else(|_| DEFAULT_QUALITY.to_string())
            .parse()
            .expect("DEFAULT_QUALITY must be 1-100");

        let default_format = ImageFormat::parse_lossy(
            &std::env::var("DEFAULT_FORMAT").unwrap_or_else(|_| "jpeg".into()),
        );

        let default_width = std::env::var("DEFAULT_WIDTH")
            .ok()
            .map(|v| v.parse().expect("DEFAULT_WIDTH must be pixels"));

        let default_height = std::env::var("DEFAULT_HEIGHT")
            .ok()
            .map(|v| v.parse().expect("DEFAULT_HEIGHT must be pixels"));

        Self {
            rabbit_url,
            queue_name,
            batch: BatchConfig {
                batch_size,
                inter_batch_delay: Duration::from_millis(inter_batch_ms),
                ..BatchConfig::default()
            },
            default_quality,
            default_format,
            default_width,
            default_height,
        }
    }
}
