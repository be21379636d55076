//! `squish-publisher` — push compression jobs onto the work queue.
//!
//! ```text
//! squish-publisher <path> [quality] [format] [width] [height]
//! ```
//!
//! A file path publishes a single job for that image; a directory path
//! publishes one job per contained image file (jpg/jpeg/png/webp/tiff/bmp),
//! paced in batches. Prints queue statistics when done.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use squish_broker::BrokerSession;
use squish_core::{ImageFormat, JobDescriptor};
use squish_publisher::{publish_batch, PublisherConfig};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "tiff", "bmp"];

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "squish_publisher=info,squish_broker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        print_usage();
        return;
    }

    let config = PublisherConfig::from_env();
    if let Err(e) = run(&config, &args).await {
        tracing::error!(error = %e, "Publishing failed");
        std::process::exit(1);
    }
}

async fn run(config: &PublisherConfig, args: &[String]) -> anyhow::Result<()> {
    let target = PathBuf::from(&args[0]);
    let quality = parse_arg::<u8>(args.get(1), "quality")?;
    let format = args.get(2).map(|s| ImageFormat::parse_lossy(s));
    let width = parse_arg::<u32>(args.get(3), "width")?;
    let height = parse_arg::<u32>(args.get(4), "height")?;

    let paths = if tokio::fs::metadata(&target)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        let found = scan_directory(&target).await?;
        anyhow::ensure!(
            !found.is_empty(),
            "no image files found in {}",
            target.display(),
        );
        found
    } else {
        // A single file is published as-is; the consumer validates that
        // the path actually resolves on its side.
        vec![target]
    };

    let descriptors: Vec<JobDescriptor> = paths
        .iter()
        .map(|path| descriptor_for(path, config, quality, format, width, height))
        .collect();

    let mut session = BrokerSession::new(&config.rabbit_url, &config.queue_name, 1);
    session
        .connect()
        .await
        .context("could not reach the broker")?;

    let result = publish_batch(&mut session, &descriptors, &config.batch).await;

    match session.queue_info().await {
        Ok(info) => tracing::info!(
            messages = info.message_count,
            consumers = info.consumer_count,
            "Queue status",
        ),
        Err(e) => tracing::warn!(error = %e, "Could not fetch queue status"),
    }

    session.disconnect().await;
    result.context("batch publish failed")?;
    Ok(())
}

fn descriptor_for(
    path: &Path,
    config: &PublisherConfig,
    quality: Option<u8>,
    format: Option<ImageFormat>,
    width: Option<u32>,
    height: Option<u32>,
) -> JobDescriptor {
    let mut metadata = serde_json::Map::new();
    metadata.insert("publishedBy".into(), "squish-publisher".into());
    metadata.insert(
        "publishTime".into(),
        chrono::Utc::now().to_rfc3339().into(),
    );

    JobDescriptor {
        quality: Some(quality.unwrap_or(config.default_quality)),
        format: Some(format.unwrap_or(config.default_format)),
        width: width.or(config.default_width),
        height: height.or(config.default_height),
        metadata,
        ..JobDescriptor::new(path.display().to_string())
    }
}

/// Collect image files directly under `dir`, sorted for stable publish order.
async fn scan_directory(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("could not read directory {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

fn parse_arg<T: std::str::FromStr>(
    raw: Option<&String>,
    name: &str,
) -> anyhow::Result<Option<T>> {
    raw.map(|value| {
        value
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid {name}: {value:?}"))
    })
    .transpose()
}

fn print_usage() {
    println!(
        "\
squish-publisher — publish image-compression jobs

Usage:
  squish-publisher <path> [quality] [format] [width] [height]

Arguments:
  path      Image file, or a directory of images (one job per file)
  quality   Compression quality 1-100 (default: 80)
  format    Output format: jpeg|png|webp (default: jpeg)
  width     Target width in pixels (optional)
  height    Target height in pixels (optional)

Broker settings come from RABBITMQ_URL / QUEUE_NAME / BATCH_SIZE /
PUBLISH_INTERVAL environment variables (a .env file is honored)."
    );
}
