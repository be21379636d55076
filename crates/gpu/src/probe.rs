//! `nvidia-smi` invocation and CSV row parsing.
//!
//! Two query shapes are used: a full availability query (device name +
//! memory + utilization) run once at startup, and a lighter stats query
//! (utilization + memory + temperature) run on every poll tick. Both use
//! `--format=csv,noheader,nounits`, one row per device.

use std::io;

use serde::Serialize;
use tokio::process::Command;

const NVIDIA_SMI: &str = "nvidia-smi";
const AVAILABILITY_QUERY: &str = "--query-gpu=name,memory.total,memory.used,utilization.gpu";
const STATS_QUERY: &str = "--query-gpu=utilization.gpu,memory.used,memory.total,temperature.gpu";
const CSV_FORMAT: &str = "--format=csv,noheader,nounits";

/// Probe failures are soft: the monitor downgrades every variant to
/// "GPU absent" rather than propagating.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// `nvidia-smi` is not installed — the host has no NVIDIA driver stack.
    #[error("nvidia-smi not found on PATH")]
    NotFound,

    #[error("GPU probe failed: {0}")]
    Failed(String),
}

/// One physical device as seen by the availability query. Temperature is
/// only reported by the periodic stats query, so it starts out absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuDevice {
    pub name: String,
    pub memory_total_mb: u32,
    pub memory_used_mb: u32,
    pub memory_free_mb: u32,
    pub utilization_percent: u32,
    pub temperature_celsius: Option<u32>,
}

/// One row from the periodic stats query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStats {
    pub utilization_percent: u32,
    pub memory_used_mb: u32,
    pub memory_total_mb: u32,
    pub memory_free_mb: u32,
    pub temperature_celsius: u32,
}

/// Run the full availability query, one [`GpuDevice`] per row.
pub async fn query_devices() -> Result<Vec<GpuDevice>, ProbeError> {
    let stdout = run_probe(NVIDIA_SMI, AVAILABILITY_QUERY).await?;
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_device_line)
        .collect()
}

/// Run the lighter per-tick stats query, one [`DeviceStats`] per row.
pub async fn query_stats() -> Result<Vec<DeviceStats>, ProbeError> {
    let stdout = run_probe(NVIDIA_SMI, STATS_QUERY).await?;
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_stats_line)
        .collect()
}

/// Spawn the probe and capture stdout. A missing executable maps to
/// [`ProbeError::NotFound`]; every other failure (spawn error, non-zero
/// exit) maps to [`ProbeError::Failed`].
async fn run_probe(program: &str, query: &str) -> Result<String, ProbeError> {
    let output = Command::new(program)
        .arg(query)
        .arg(CSV_FORMAT)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ProbeError::NotFound,
            _ => ProbeError::Failed(e.to_string()),
        })?;

    if !output.status.success() {
        return Err(ProbeError::Failed(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim(),
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse one `name, memory.total, memory.used, utilization.gpu` row.
fn parse_device_line(line: &str) -> Result<GpuDevice, ProbeError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(ProbeError::Failed(format!(
            "unexpected device row: {line:?}"
        )));
    }

    let memory_total_mb = parse_field(fields[1], "memory.total", line)?;
    let memory_used_mb = parse_field(fields[2], "memory.used", line)?;

    Ok(GpuDevice {
        name: fields[0].to_string(),
        memory_total_mb,
        memory_used_mb,
        memory_free_mb: memory_total_mb.saturating_sub(memory_used_mb),
        utilization_percent: parse_field(fields[3], "utilization.gpu", line)?,
        temperature_celsius: None,
    })
}

/// Parse one `utilization.gpu, memory.used, memory.total, temperature.gpu` row.
fn parse_stats_line(line: &str) -> Result<DeviceStats, ProbeError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(ProbeError::Failed(format!("unexpected stats row: {line:?}")));
    }

    let memory_used_mb = parse_field(fields[1], "memory.used", line)?;
    let memory_total_mb = parse_field(fields[2], "memory.total", line)?;

    Ok(DeviceStats {
        utilization_percent: parse_field(fields[0], "utilization.gpu", line)?,
        memory_used_mb,
        memory_total_mb,
        memory_free_mb: memory_total_mb.saturating_sub(memory_used_mb),
        temperature_celsius: parse_field(fields[3], "temperature.gpu", line)?,
    })
}

fn parse_field(raw: &str, column: &str, line: &str) -> Result<u32, ProbeError> {
    raw.parse().map_err(|_| {
        ProbeError::Failed(format!("non-numeric {column} value {raw:?} in row {line:?}"))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
