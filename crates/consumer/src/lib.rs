//! Consumer-side processing pipeline for the compression queue.
//!
//! [`admission`] couples GPU readiness to job execution and decides the
//! acknowledgment for every delivery; [`engine`] performs the actual
//! encode behind a trait seam; [`joblog`] keeps the append-only record of
//! successes and terminal failures; [`config`] loads the daemon's
//! environment configuration.

pub mod admission;
pub mod config;
pub mod engine;
pub mod joblog;

pub use admission::AdmissionController;
pub use engine::{CompressionEngine, EngineError, ImageEngine};
pub use joblog::JobLog;
