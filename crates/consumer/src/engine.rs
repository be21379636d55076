//! The compression engine: decode, optional resize, re-encode.
//!
//! The admission controller only sees the [`CompressionEngine`] trait; the
//! real implementation runs the CPU-bound pipeline on the blocking pool.
//! The `use_gpu` hint tunes encoder effort (resize filter quality, png
//! compression level) — it never changes whether a job runs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{self, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use squish_core::{CompressionOutcome, ImageFormat, JobEnvelope, JobOptions};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Engine task failed: {0}")]
    Internal(String),
}

/// Seam between admission control and the actual encode work.
#[async_trait]
pub trait CompressionEngine: Send + Sync {
    async fn compress(
        &self,
        job: &JobEnvelope,
        use_gpu: bool,
    ) -> Result<CompressionOutcome, EngineError>;
}

/// Engine backed by the `image` crate. Output files are named
/// `compressed-<job id>.<format>` under the configured directory.
pub struct ImageEngine {
    output_dir: PathBuf,
}

impl ImageEngine {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl CompressionEngine for ImageEngine {
    async fn compress(
        &self,
        job: &JobEnvelope,
        use_gpu: bool,
    ) -> Result<CompressionOutcome, EngineError> {
        let input = PathBuf::from(&job.input_path);
        let output = self
            .output_dir
            .join(format!("compressed-{}.{}", job.id, job.options.format.as_str()));
        let options = job.options.clone();

        tokio::task::spawn_blocking(move || compress_blocking(&input, &output, &options, use_gpu))
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?
    }
}

fn compress_blocking(
    input: &Path,
    output: &Path,
    options: &JobOptions,
    use_gpu: bool,
) -> Result<CompressionOutcome, EngineError> {
    let original_size_bytes = std::fs::metadata(input)?.len();
    let start = Instant::now();

    let mut img = image::open(input)?;

    if options.width.is_some() || options.height.is_some() {
        let max_width = options.width.unwrap_or(u32::MAX);
        let max_height = options.height.unwrap_or(u32::MAX);
        // Fit inside the requested box, never enlarging the source.
        if img.width() > max_width || img.height() > max_height {
            let filter = if use_gpu {
                FilterType::Lanczos3
            } else {
                FilterType::CatmullRom
            };
            img = img.resize(max_width, max_height, filter);
        }
    }

    encode(&img, output, options, use_gpu)?;

    let compressed_size_bytes = std::fs::metadata(output)?.len();

    Ok(CompressionOutcome {
        output_path: output.display().to_string(),
        original_size_bytes,
        compressed_size_bytes,
        processing_time_ms: start.elapsed().as_millis() as u64,
    })
}

fn encode(
    img: &DynamicImage,
    output: &Path,
    options: &JobOptions,
    use_gpu: bool,
) -> Result<(), EngineError> {
    let file = std::fs::File::create(output)?;
    let mut writer = std::io::BufWriter::new(file);

    match options.format {
        ImageFormat::Jpeg => {
            let encoder =
                JpegEncoder::new_with_quality(&mut writer, options.quality.clamp(1, 100));
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        }
        ImageFormat::Png => {
            let compression = if use_gpu {
                png::CompressionType::Best
            } else {
                png::CompressionType::Default
            };
            let encoder =
                PngEncoder::new_with_quality(&mut writer, compression, png::FilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        ImageFormat::WebP => {
            // The webp encoder is lossless; quality does not apply.
            let encoder = WebPEncoder::new_lossless(&mut writer);
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)?;
        }
    }

    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
