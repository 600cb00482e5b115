use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::frame::PixelFormat;
use crate::error::SourceError;

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

impl Default for FoundDevice {
    fn default() -> Self {
        Self::new(String::new(), PixelFormat::Mjpeg)
    }
}

/// A capture-capable node and the formats we know how to read from it.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub card: String,
    pub driver: String,
    pub formats: Vec<PixelFormat>,
}

fn probe(path: &str) -> Option<DeviceInfo> {
    let dev = Device::with_path(path).ok()?;
    let caps = dev.query_caps().ok()?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        debug!("{} has no capture capability", path);
        return None;
    }

    let formats = dev
        .enum_formats()
        .map(|formats| {
            formats
                .into_iter()
                .filter_map(|fmt| {
                    if fmt.fourcc == FourCC::new(b"MJPG") {
                        Some(PixelFormat::Mjpeg)
                    } else if fmt.fourcc == FourCC::new(b"YUYV") {
                        Some(PixelFormat::Yuyv4)
                    } else {
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Some(DeviceInfo {
        path: path.to_string(),
        card: caps.card,
        driver: caps.driver,
        formats,
    })
}

/// Enumerate `/dev/video0` .. `/dev/video9` for capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    (0..10)
        .map(|i| format!("/dev/video{}", i))
        .filter(|path| Path::new(path).exists())
        .filter_map(|path| probe(&path))
        .collect()
}

/// Auto-detect best capture device, preferring MJPEG over YUYV
pub fn auto_detect_device() -> Result<FoundDevice, SourceError> {
    info!("Auto-detecting capture devices...");

    let devices = list_devices();
    for wanted in [PixelFormat::Mjpeg, PixelFormat::Yuyv4] {
        if let Some(dev) = devices.iter().find(|d| d.formats.contains(&wanted)) {
            info!("Found {:?} device: {} - {}", wanted, dev.path, dev.card);
            return Ok(FoundDevice::new(dev.path.clone(), wanted));
        }
    }

    Err(SourceError::Open("no suitable capture device found".into()))
}
