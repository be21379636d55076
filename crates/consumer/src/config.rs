//! Consumer daemon configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the queue consumer.
///
/// All fields have defaults suitable for local development; override via
/// environment variables (a `.env` file is honored).
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Broker URL (default: `amqp://localhost:5672`).
    pub rabbit_url: String,
    /// Durable work queue name (default: `image_compression_queue`).
    pub queue_name: String,
    /// Unacknowledged-delivery bound per session (default: `1`).
    pub prefetch_count: u16,
    /// GPU stats poll interval (default: 30 000 ms).
    pub gpu_check_interval: Duration,
    /// Budget for waiting on a busy GPU (default: 300 000 ms).
    pub gpu_wait_timeout: Duration,
    /// Where source images are expected.
    pub input_dir: PathBuf,
    /// Where compressed output lands.
    pub output_dir: PathBuf,
    /// Where the result / failure logs live.
    pub log_dir: PathBuf,
}

impl ConsumerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                     |
    /// |----------------------|-----------------------------|
    /// | `RABBITMQ_URL`       | `amqp://localhost:5672`     |
    /// | `QUEUE_NAME`         | `image_compression_queue`   |
    /// | `PREFETCH_COUNT`     | `1`                         |
    /// | `GPU_CHECK_INTERVAL` | `30000` (ms)                |
    /// | `GPU_WAIT_TIMEOUT`   | `300000` (ms)               |
    /// | `INPUT_DIR`          | `./input`                   |
    /// | `OUTPUT_DIR`         | `./output`                  |
    /// | `LOG_DIR`            | `./logs`                    |
    pub fn from_env() -> Self {
        let rabbit_url =
            std::env::var("RABBITMQ_URL").unwrap_or_else(|_| "amqp://localhost:5672".into());

        let queue_name =
            std::env::var("QUEUE_NAME").unwrap_or_else(|_| "image_compression_queue".into());

        let prefetch_count: u16 = std::env::var("PREFETCH_COUNT")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("PREFETCH_COUNT must be a valid u16");

        let gpu_check_interval_ms: u64 = std::env::var("GPU_CHECK_INTERVAL")
            .unwrap_or_else(|_| "30000".into())
            .parse()
            .expect("GPU_CHECK_INTERVAL must be milliseconds");

        let gpu_wait_timeout_ms: u64 = std::env::var("GPU_WAIT_TIMEOUT")
            .unwrap_or_else(|_| "300000".into())
            .parse()
            .expect("GPU_WAIT_TIMEOUT must be milliseconds");

        let input_dir = PathBuf::from(std::env::var("INPUT_DIR").unwrap_or_else(|_| "./input".into()));
        let output_dir =
            PathBuf::from(std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "./output".into()));
        let log_dir = PathBuf::from(std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".into()));

        Self {
            rabbit_url,
            queue_name,
            prefetch_count,
            gpu_check_interval: Duration::from_millis(gpu_check_interval_ms),
            gpu_wait_timeout: Duration::from_millis(gpu_wait_timeout_ms),
            input_dir,
            output_dir,
            log_dir,
        }
    }
}
