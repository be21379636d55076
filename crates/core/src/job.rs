//! The job envelope — the unit of work exchanged over the queue.
//!
//! Envelopes are built by the publisher via [`JobEnvelope::from_descriptor`],
//! serialized to JSON bytes for transport, and decoded back on the consumer
//! side. The wire format uses camelCase field names and must round-trip
//! field-for-field; decoders tolerate unknown extra fields and fill defaults
//! for absent optional ones.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CoreError;

/// Compression quality applied when a descriptor does not specify one.
pub const DEFAULT_QUALITY: u8 = 80;

/// Output format for a compression job. Serialized lowercase; `jpg` is
/// accepted as an alias for `jpeg` on decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    WebP,
}

impl ImageFormat {
    /// Wire / file-extension spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
        }
    }

    /// Parse a user-supplied format name, defaulting to `Jpeg` for unknown
    /// values (mirrors the permissive handling of queue payloads).
    pub fn parse_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "png" => ImageFormat::Png,
            "webp" => ImageFormat::WebP,
            _ => ImageFormat::Jpeg,
        }
    }
}

/// Per-job compression options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Compression quality, 1–100.
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub format: ImageFormat,
    /// Target width in pixels; absent means keep the source width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Target height in pixels; absent means keep the source height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            format: ImageFormat::default(),
            width: None,
            height: None,
        }
    }
}

/// A compression job as carried on the queue. Immutable once published.
///
/// On the wire only `id` and `inputPath` are mandatory; every other field
/// decodes to its default when absent (see [`JobEnvelope::from_bytes`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub id: Uuid,
    pub input_path: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub original_name: String,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Opaque caller-supplied key/value pairs, passed through untouched.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Publisher-side request from which an envelope is built.
///
/// Only `input_path` is mandatory; everything else falls back to a default
/// at build time.
#[derive(Debug, Clone, Default)]
pub struct JobDescriptor {
    pub input_path: String,
    pub filename: Option<String>,
    pub original_name: Option<String>,
    pub quality: Option<u8>,
    pub format: Option<ImageFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub metadata: Map<String, Value>,
}

impl JobDescriptor {
    pub fn new(input_path: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            ..Self::default()
        }
    }
}

impl JobEnvelope {
    /// Build a publishable envelope from a descriptor.
    ///
    /// Fails with [`CoreError::Validation`] when `input_path` is empty.
    /// `filename` defaults to the basename of `input_path`, and
    /// `original_name` to `filename`. A fresh id and timestamp are stamped
    /// on every call.
    pub fn from_descriptor(desc: JobDescriptor) -> Result<Self, CoreError> {
        if desc.input_path.trim().is_empty() {
            return Err(CoreError::Validation(
                "inputPath is required for publishing a job".into(),
            ));
        }

        let filename = desc
            .filename
            .unwrap_or_else(|| basename(&desc.input_path));
        let original_name = desc.original_name.unwrap_or_else(|| filename.clone());

        Ok(Self {
            id: Uuid::new_v4(),
            input_path: desc.input_path,
            filename,
            original_name,
            options: JobOptions {
                quality: desc.quality.unwrap_or(DEFAULT_QUALITY),
                format: desc.format.unwrap_or_default(),
                width: desc.width,
                height: desc.height,
            },
            timestamp: Utc::now(),
            metadata: desc.metadata,
        })
    }

    /// Serialize for transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a queue payload.
    ///
    /// Tolerates unknown extra fields and fills name defaults from the
    /// input path, mirroring [`JobEnvelope::from_descriptor`]. An empty
    /// `inputPath` fails validation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let mut envelope: Self = serde_json::from_slice(bytes)?;
        if envelope.input_path.trim().is_empty() {
            return Err(CoreError::Validation("inputPath is required".into()));
        }
        if envelope.filename.is_empty() {
            envelope.filename = basename(&envelope.input_path);
        }
        if envelope.original_name.is_empty() {
            envelope.original_name = envelope.filename.clone();
        }
        Ok(envelope)
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
