//! Result record produced by a compression engine run.

use serde::Serialize;

/// What a successful compression produced.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionOutcome {
    pub output_path: String,
    pub original_size_bytes: u64,
    pub compressed_size_bytes: u64,
    pub processing_time_ms: u64,
}

impl CompressionOutcome {
    /// Space saved relative to the original, as a percentage. Negative when
    /// the output ended up larger than the input.
    pub fn compression_ratio_percent(&self) -> f64 {
        if self.original_size_bytes == 0 {
            return 0.0;
        }
        (self.original_size_bytes as f64 - self.compressed_size_bytes as f64)
            / self.original_size_bytes as f64
            * 100.0
    }
}

/// Human-readable byte count for log lines (`1536` → `"1.50 KB"`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".into();
    }
    let exp = (bytes as f64).log(1024.0).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exp as i32);
    if exp == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[exp])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(original: u64, compressed: u64) -> CompressionOutcome {
        CompressionOutcome {
            output_path: "/out/x.jpeg".into(),
            original_size_bytes: original,
            compressed_size_bytes: compressed,
            processing_time_ms: 12,
        }
    }

    #[test]
    fn ratio_for_typical_compression() {
        assert!((outcome(1000, 250).compression_ratio_percent() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ratio_negative_when_output_grew() {
        assert!(outcome(1000, 1500).compression_ratio_percent() < 0.0);
    }

    #[test]
    fn ratio_zero_for_empty_input() {
        assert_eq!(outcome(0, 0).compression_ratio_percent(), 0.0);
    }

    #[test]
    fn format_bytes_picks_sensible_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
