//! Publisher-side batching and pacing for the compression queue.

pub mod batch;
pub mod config;

pub use batch::{publish_batch, BatchConfig, JobSink, PublishError};
pub use config::PublisherConfig;
