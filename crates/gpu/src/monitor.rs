//! Cached GPU readiness state, refreshed on a poll interval.
//!
//! [`GpuMonitor`] is constructed once at process start and handed to the
//! consumer as a shared handle; only its own poll task mutates the state,
//! readers take immutable snapshots via [`GpuMonitor::status`]. The poll
//! task is an explicit cancellable background task with idempotent
//! [`GpuMonitor::start`] / [`GpuMonitor::stop`] lifecycle controls.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::probe::{self, DeviceStats, GpuDevice, ProbeError};

/// A device must have more than this much free memory to accept work.
pub const MIN_FREE_MEMORY_MB: u32 = 1024;

/// A device at or above this utilization is considered busy.
pub const MAX_UTILIZATION_PERCENT: u32 = 90;

/// Default interval between stats refreshes.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(30_000);

/// Read-only snapshot of the monitor state.
#[derive(Debug, Clone, Serialize)]
pub struct GpuStatus {
    /// Whether the probe has succeeded at least once.
    pub available: bool,
    /// `available` AND at least one device has spare memory and compute.
    pub ready: bool,
    pub devices: Vec<GpuDevice>,
    pub last_updated: DateTime<Utc>,
}

impl GpuStatus {
    /// Status of a host with no GPU stack at all.
    pub fn absent() -> Self {
        Self {
            available: false,
            ready: false,
            devices: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

/// Whether a single device has capacity for a job right now.
pub fn device_is_ready(device: &GpuDevice) -> bool {
    device.memory_free_mb > MIN_FREE_MEMORY_MB
        && device.utilization_percent < MAX_UTILIZATION_PERCENT
}

fn compute_ready(available: bool, devices: &[GpuDevice]) -> bool {
    available && devices.iter().any(device_is_ready)
}

/// The readiness snapshot the admission path consumes. Implemented by
/// [`GpuMonitor`]; tests substitute scripted sources.
pub trait StatusSource: Send + Sync {
    fn status(&self) -> GpuStatus;
}

#[derive(Debug)]
struct MonitorState {
    available: bool,
    devices: Vec<GpuDevice>,
    last_updated: DateTime<Utc>,
}

struct PollTask {
    cancel: CancellationToken,
    _handle: tokio::task::JoinHandle<()>,
}

/// Process-wide GPU readiness monitor.
pub struct GpuMonitor {
    state: Arc<RwLock<MonitorState>>,
    poll: Mutex<Option<PollTask>>,
}

impl Default for GpuMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuMonitor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState {
                available: false,
                devices: Vec::new(),
                last_updated: Utc::now(),
            })),
            poll: Mutex::new(None),
        }
    }

    /// Run the full availability probe once and record the result.
    ///
    /// Returns whether a GPU is available. Never fails: a missing probe
    /// executable or a failing probe both downgrade to "GPU absent", which
    /// the consumer treats as "no gating required".
    pub async fn check_availability(&self) -> bool {
        match probe::query_devices().await {
            Ok(devices) => {
                for (index, device) in devices.iter().enumerate() {
                    tracing::info!(
                        index,
                        name = %device.name,
                        memory_used_mb = device.memory_used_mb,
                        memory_total_mb = device.memory_total_mb,
                        utilization_percent = device.utilization_percent,
                        "GPU detected",
                    );
                }
                let mut state = self.state.write().expect("monitor state poisoned");
                state.available = true;
                state.devices = devices;
                state.last_updated = Utc::now();
                true
            }
            Err(ProbeError::NotFound) => {
                tracing::info!("nvidia-smi not found, processing will not be GPU-gated");
                self.mark_unavailable();
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "GPU availability check failed");
                self.mark_unavailable();
                false
            }
        }
    }

    /// Run the lighter stats probe and merge the readings into the cached
    /// devices by index. A failed refresh keeps the previous readings.
    pub async fn refresh(&self) {
        refresh_state(&self.state).await;
    }

    /// Non-blocking snapshot of the current state.
    pub fn status(&self) -> GpuStatus {
        let state = self.state.read().expect("monitor state poisoned");
        GpuStatus {
            available: state.available,
            ready: compute_ready(state.available, &state.devices),
            devices: state.devices.clone(),
            last_updated: state.last_updated,
        }
    }

    /// Start the background poll task. A no-op if already running. The
    /// first refresh happens immediately, then every `interval`.
    pub fn start(&self, interval: Duration) {
        let mut poll = self.poll.lock().expect("poll slot poisoned");
        if poll.is_some() {
            return;
        }

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "Starting GPU monitoring",
        );

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => refresh_state(&state).await,
                }
            }
        });

        *poll = Some(PollTask {
            cancel,
            _handle: handle,
        });
    }

    /// Stop the poll task. A no-op if not running.
    pub fn stop(&self) {
        let mut poll = self.poll.lock().expect("poll slot poisoned");
        if let Some(task) = poll.take() {
            task.cancel.cancel();
            tracing::info!("GPU monitoring stopped");
        }
    }

    fn mark_unavailable(&self) {
        let mut state = self.state.write().expect("monitor state poisoned");
        state.available = false;
        state.devices.clear();
        state.last_updated = Utc::now();
    }
}

impl StatusSource for GpuMonitor {
    fn status(&self) -> GpuStatus {
        GpuMonitor::status(self)
    }
}

/// One refresh pass, shared by [`GpuMonitor::refresh`] and the poll task.
async fn refresh_state(state: &RwLock<MonitorState>) {
    {
        let state = state.read().expect("monitor state poisoned");
        if !state.available {
            return;
        }
    }

    match probe::query_stats().await {
        Ok(stats) => {
            let mut state = state.write().expect("monitor state poisoned");
            merge_stats(&mut state.devices, &stats);
            state.last_updated = Utc::now();
        }
        Err(e) => {
            tracing::warn!(error = %e, "GPU stats refresh failed, keeping previous readings");
        }
    }
}

/// Overlay stats rows onto the cached devices, matching by index. Rows
/// beyond the known device list are ignored; devices beyond the stats rows
/// keep their previous readings.
fn merge_stats(devices: &mut [GpuDevice], stats: &[DeviceStats]) {
    for (device, reading) in devices.iter_mut().zip(stats) {
        device.utilization_percent = reading.utilization_percent;
        device.memory_used_mb = reading.memory_used_mb;
        device.memory_total_mb = reading.memory_total_mb;
        device.memory_free_mb = reading.memory_free_mb;
        device.temperature_celsius = Some(reading.temperature_celsius);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn device(free_mb: u32, utilization: u32) -> GpuDevice {
        GpuDevice {
            name: "Test GPU".into(),
            memory_total_mb: 24576,
            memory_used_mb: 24576 - free_mb,
            memory_free_mb: free_mb,
            utilization_percent: utilization,
            temperature_celsius: None,
        }
    }

    fn monitor_with(available: bool, devices: Vec<GpuDevice>) -> GpuMonitor {
        let monitor = GpuMonitor::new();
        {
            let mut state = monitor.state.write().unwrap();
            state.available = available;
            state.devices = devices;
        }
        monitor
    }

    // -- readiness rule --

    #[test]
    fn ready_requires_free_memory_and_low_utilization() {
        assert!(device_is_ready(&device(2048, 50)));
        assert!(!device_is_ready(&device(512, 50))); // too little memory
        assert!(!device_is_ready(&device(2048, 95))); // too busy
        assert!(!device_is_ready(&device(512, 95)));
    }

    #[test]
    fn readiness_boundaries_are_exclusive() {
        // Exactly 1024 MB free is not enough; exactly 90% utilization is busy.
        assert!(!device_is_ready(&device(1024, 50)));
        assert!(device_is_ready(&device(1025, 50)));
        assert!(!device_is_ready(&device(2048, 90)));
        assert!(device_is_ready(&device(2048, 89)));
    }

    #[test]
    fn one_ready_device_is_enough() {
        let status = monitor_with(true, vec![device(100, 99), device(8192, 10)]).status();
        assert!(status.ready);
    }

    #[test]
    fn not_ready_when_all_devices_busy() {
        let status = monitor_with(true, vec![device(100, 99), device(200, 95)]).status();
        assert!(status.available);
        assert!(!status.ready);
    }

    #[test]
    fn never_ready_when_unavailable() {
        // Even with capacity-looking device rows, unavailable wins.
        let status = monitor_with(false, vec![device(8192, 10)]).status();
        assert!(!status.available);
        assert!(!status.ready);
    }

    #[test]
    fn absent_status_is_not_ready() {
        let status = GpuStatus::absent();
        assert!(!status.available);
        assert!(!status.ready);
        assert!(status.devices.is_empty());
    }

    // -- stats merge --

    #[test]
    fn merge_overlays_readings_by_index() {
        let mut devices = vec![device(22528, 10), device(22528, 20)];
        let stats = vec![DeviceStats {
            utilization_percent: 97,
            memory_used_mb: 24000,
            memory_total_mb: 24576,
            memory_free_mb: 576,
            temperature_celsius: 83,
        }];

        merge_stats(&mut devices, &stats);

        assert_eq!(devices[0].utilization_percent, 97);
        assert_eq!(devices[0].memory_free_mb, 576);
        assert_eq!(devices[0].temperature_celsius, Some(83));
        // Second device had no matching row and keeps its readings.
        assert_eq!(devices[1].utilization_percent, 20);
        assert_eq!(devices[1].temperature_celsius, None);
    }

    // -- probe failure handling --

    /// Without the NVIDIA stack installed (typical CI) the availability
    /// check must return false and leave the monitor unavailable, never
    /// panic or error.
    #[tokio::test]
    async fn check_availability_is_soft_on_hosts_without_probe() {
        let monitor = GpuMonitor::new();
        let available = monitor.check_availability().await;
        assert_eq!(monitor.status().available, available);
        if !available {
            assert!(!monitor.status().ready);
        }
    }

    #[tokio::test]
    async fn refresh_is_a_noop_while_unavailable() {
        let monitor = GpuMonitor::new();
        let before = monitor.status().last_updated;
        monitor.refresh().await;
        assert_eq!(monitor.status().last_updated, before);
    }

    // -- lifecycle --

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let monitor = GpuMonitor::new();
        monitor.start(Duration::from_secs(3600));
        monitor.start(Duration::from_secs(3600)); // no-op
        assert!(monitor.poll.lock().unwrap().is_some());
        monitor.stop();
        assert!(monitor.poll.lock().unwrap().is_none());
        monitor.stop(); // no-op
    }
}
