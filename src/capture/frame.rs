use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A frame as delivered by a source, before anyone has checked its shape.
#[derive(Debug)]
pub struct RawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// When the frame left the device or decoder
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

/// Validated frame data. Ownership moves from stage to stage; it is never cloned.
#[derive(Debug)]
pub struct Frame {
    /// Row-major pixel bytes in `meta.format`
    pub data: Bytes,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Frame {
    /// Wrap a raw frame that already passed validation, laid out as `format`.
    pub fn accept(raw: RawFrame, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data: raw.data,
            meta: FrameMetadata {
                sequence,
                width: raw.width,
                height: raw.height,
                format,
            },
            timestamp: raw.timestamp,
        }
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed layouts. Compressed and planar formats have none.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg | PixelFormat::Nv12 => None,
        }
    }

    /// Name of the layout in ffmpeg's `-pix_fmt` vocabulary.
    pub fn ffmpeg_name(self) -> Option<&'static str> {
        match self {
            PixelFormat::Rgb24 => Some("rgb24"),
            PixelFormat::Bgr24 => Some("bgr24"),
            PixelFormat::Yuyv4 => Some("yuyv422"),
            PixelFormat::Nv12 => Some("nv12"),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Expected shape of every frame crossing a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProfile {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub format: PixelFormat,
}

impl FrameProfile {
    /// Profile for a packed layout, taking bytes per pixel from the format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, ConfigError> {
        let bytes_per_pixel = format.bytes_per_pixel().ok_or_else(|| {
            ConfigError::Invalid(format!("{format:?} is not a packed pixel layout"))
        })?;
        Self::with_bytes_per_pixel(width, height, bytes_per_pixel, format)
    }

    pub fn with_bytes_per_pixel(
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        format: PixelFormat,
    ) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 || bytes_per_pixel == 0 {
            return Err(ConfigError::Invalid(format!(
                "frame profile must be non-zero, got {width}x{height}x{bytes_per_pixel}"
            )));
        }
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            format,
        })
    }

    /// `width * height * bytes_per_pixel`
    pub fn expected_byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }

    /// Bytes in one row of pixels.
    pub fn pitch(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }
}
