//! Integration tests for the admission controller: acknowledgment
//! discipline against a scripted broker double, GPU wait-loop bounds, and
//! the no-GPU fast path.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use squish_broker::{JobHandler, JobOutcome};
use squish_consumer::admission::GPU_POLL_INTERVAL;
use squish_consumer::{AdmissionController, CompressionEngine, EngineError, JobLog};
use squish_core::{CompressionOutcome, ImageFormat, JobDescriptor, JobEnvelope};
use squish_gpu::{GpuStatus, StatusSource};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

fn busy_status() -> GpuStatus {
    GpuStatus {
        available: true,
        ready: false,
        devices: Vec::new(),
        last_updated: Utc::now(),
    }
}

fn ready_status() -> GpuStatus {
    GpuStatus {
        available: true,
        ready: true,
        devices: Vec::new(),
        last_updated: Utc::now(),
    }
}

/// Pops scripted statuses in order; the last one repeats forever.
struct ScriptedStatus {
    statuses: Mutex<VecDeque<GpuStatus>>,
}

impl ScriptedStatus {
    fn new(statuses: Vec<GpuStatus>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into()),
        })
    }
}

impl StatusSource for ScriptedStatus {
    fn status(&self) -> GpuStatus {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses.front().cloned().expect("script must not be empty")
        }
    }
}

/// Counts calls and records what it was asked to do.
struct MockEngine {
    calls: AtomicUsize,
    fail: bool,
    seen: Mutex<Vec<(JobEnvelope, bool)>>,
}

impl MockEngine {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompressionEngine for MockEngine {
    async fn compress(
        &self,
        job: &JobEnvelope,
        use_gpu: bool,
    ) -> Result<CompressionOutcome, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((job.clone(), use_gpu));
        if self.fail {
            Err(EngineError::Internal("engine exploded".into()))
        } else {
            Ok(CompressionOutcome {
                output_path: format!("/out/compressed-{}.jpeg", job.id),
                original_size_bytes: 1000,
                compressed_size_bytes: 400,
                processing_time_ms: 5,
            })
        }
    }
}

/// Minimal broker double: hands each queued payload to the handler exactly
/// once and records the settlement. A nacked message is discarded, never
/// redelivered.
struct DoubleBroker {
    settled: Vec<JobOutcome>,
}

impl DoubleBroker {
    fn new() -> Self {
        Self {
            settled: Vec::new(),
        }
    }

    async fn deliver_all(&mut self, payloads: &[Vec<u8>], handler: &dyn JobHandler) {
        for payload in payloads {
            let outcome = handler.handle(payload).await;
            self.settled.push(outcome);
        }
    }
}

fn temp_log_dir(tag: &str) -> PathBuf {
    let dir =
        std::env::temp_dir().join(format!("squish-admission-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn controller(
    status: Arc<dyn StatusSource>,
    engine: Arc<dyn CompressionEngine>,
    tag: &str,
    wait_timeout: Duration,
) -> AdmissionController {
    AdmissionController::new(status, engine, JobLog::new(temp_log_dir(tag)), wait_timeout)
}

fn envelope(mutate: impl FnOnce(&mut JobDescriptor)) -> JobEnvelope {
    let mut desc = JobDescriptor::new("/in/a.jpg");
    mutate(&mut desc);
    JobEnvelope::from_descriptor(desc).unwrap()
}

// ---------------------------------------------------------------------------
// Acknowledgment discipline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_payload_is_nacked_once_and_never_redelivered() {
    let engine = MockEngine::succeeding();
    let ctrl = controller(
        ScriptedStatus::new(vec![GpuStatus::absent()]),
        engine.clone(),
        "malformed",
        Duration::from_secs(1),
    );

    let mut broker = DoubleBroker::new();
    broker
        .deliver_all(&[b"definitely not an envelope".to_vec()], &ctrl)
        .await;

    assert_eq!(broker.settled, vec![JobOutcome::Nack]);
    assert_eq!(engine.call_count(), 0, "engine must not run for garbage");
}

#[tokio::test]
async fn engine_failure_is_nacked_exactly_once() {
    let engine = MockEngine::failing();
    let ctrl = controller(
        ScriptedStatus::new(vec![GpuStatus::absent()]),
        engine.clone(),
        "engine-failure",
        Duration::from_secs(1),
    );

    let payload = envelope(|_| {}).to_bytes().unwrap();
    let mut broker = DoubleBroker::new();
    broker.deliver_all(&[payload], &ctrl).await;

    assert_eq!(broker.settled, vec![JobOutcome::Nack]);
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn successful_job_is_acked() {
    let engine = MockEngine::succeeding();
    let ctrl = controller(
        ScriptedStatus::new(vec![ready_status()]),
        engine.clone(),
        "success",
        Duration::from_secs(1),
    );

    let payload = envelope(|_| {}).to_bytes().unwrap();
    let mut broker = DoubleBroker::new();
    broker.deliver_all(&[payload], &ctrl).await;

    assert_eq!(broker.settled, vec![JobOutcome::Ack]);
    assert_eq!(engine.call_count(), 1);
    // A ready GPU means the engine ran with the GPU hint set.
    assert!(engine.seen.lock().unwrap()[0].1);
}

// ---------------------------------------------------------------------------
// Resource wait loop
// ---------------------------------------------------------------------------

/// A GPU that never becomes ready must hold the job for exactly the wait
/// budget (to within one poll interval) and then proceed regardless.
#[tokio::test(start_paused = true)]
async fn wait_loop_times_out_and_proceeds() {
    let wait_timeout = Duration::from_millis(300_000);
    let engine = MockEngine::succeeding();
    let ctrl = controller(
        ScriptedStatus::new(vec![busy_status()]),
        engine.clone(),
        "timeout",
        wait_timeout,
    );

    let payload = envelope(|_| {}).to_bytes().unwrap();
    let started = tokio::time::Instant::now();
    let outcome = ctrl.handle(&payload).await;
    let waited = started.elapsed();

    assert_eq!(outcome, JobOutcome::Ack);
    assert_eq!(engine.call_count(), 1);
    assert!(waited >= wait_timeout, "gave up early: {waited:?}");
    assert!(
        waited <= wait_timeout + GPU_POLL_INTERVAL,
        "overran the budget: {waited:?}",
    );
    // Timed out while busy, so the job ran without the GPU hint.
    assert!(!engine.seen.lock().unwrap()[0].1);
}

#[tokio::test(start_paused = true)]
async fn wait_loop_exits_as_soon_as_gpu_becomes_ready() {
    let engine = MockEngine::succeeding();
    // Initial snapshot busy, first poll busy, second poll ready.
    let ctrl = controller(
        ScriptedStatus::new(vec![busy_status(), busy_status(), ready_status()]),
        engine.clone(),
        "becomes-ready",
        Duration::from_millis(300_000),
    );

    let payload = envelope(|_| {}).to_bytes().unwrap();
    let started = tokio::time::Instant::now();
    let outcome = ctrl.handle(&payload).await;
    let waited = started.elapsed();

    assert_eq!(outcome, JobOutcome::Ack);
    assert!(waited <= 2 * GPU_POLL_INTERVAL, "kept polling after ready: {waited:?}");
}

/// No GPU stack at all means no gating: the job proceeds immediately in
/// CPU mode.
#[tokio::test]
async fn absent_gpu_skips_the_wait_entirely() {
    let engine = MockEngine::succeeding();
    let ctrl = controller(
        ScriptedStatus::new(vec![GpuStatus::absent()]),
        engine.clone(),
        "absent",
        Duration::from_millis(300_000),
    );

    let job = envelope(|d| {
        d.quality = Some(90);
        d.format = Some(ImageFormat::Png);
    });
    let payload = job.to_bytes().unwrap();

    // Real clock: anything beyond a poll tick here would be a hang.
    let outcome = tokio::time::timeout(Duration::from_millis(500), ctrl.handle(&payload))
        .await
        .expect("must not wait when the GPU is absent");

    assert_eq!(outcome, JobOutcome::Ack);
    assert_eq!(engine.call_count(), 1);

    let seen = engine.seen.lock().unwrap();
    let (job_seen, use_gpu) = &seen[0];
    assert!(!use_gpu);
    assert_eq!(job_seen.id, job.id);
    assert_eq!(job_seen.options.quality, 90);
    assert_eq!(job_seen.options.format, ImageFormat::Png);
}
