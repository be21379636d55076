//! GPU readiness monitoring for the compression consumer.
//!
//! [`probe`] shells out to `nvidia-smi` for point-in-time device readings;
//! [`monitor`] turns those into a cached, continuously-refreshed readiness
//! signal so the admission path never invokes the probe synchronously per
//! job. A host without the NVIDIA stack is a supported configuration, not an
//! error — the monitor just reports the GPU as absent.

pub mod monitor;
pub mod probe;

pub use monitor::{GpuMonitor, GpuStatus, StatusSource, DEFAULT_CHECK_INTERVAL};
pub use probe::{GpuDevice, ProbeError};
