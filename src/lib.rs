pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use capture::frame::{FrameProfile, PixelFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::paced::CaptureSettings;
use crate::pipeline::receiver::ReceiverSettings;
use crate::utils::FoundDevice;

pub use capture::{Frame, RawFrame};

/// Prefix for environment overrides, e.g. `CAMLINK__CAPTURE__WIDTH=640`.
pub const ENV_PREFIX: &str = "CAMLINK";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
    pub encoder: EncoderConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device path and the native format to request from it. An empty path auto-detects.
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Layout handed to the encoder
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub read_timeout_ms: u64,
    /// A sink write blocked longer than this ends the capture loop
    pub stall_ceiling_ms: u64,
    /// Consecutive transient read failures before the device is reopened (0 = never)
    pub reopen_after_failures: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// RTSP endpoint the sender publishes to and the receiver reads from
    pub endpoint: String,
    /// "tcp" or "udp"
    pub rtsp_transport: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// ffmpeg executable used for both encoding and decoding
    pub program: String,
    pub codec: String,
    pub preset: String,
    pub tune: String,
    pub bitrate: String,
    pub threads: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub title: String,
    pub read_timeout_ms: u64,
    pub poll_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
            width: 1280,
            height: 720,
            fps: 30,
            format: PixelFormat::Bgr24,
            buffer_count: 4,
            read_timeout_ms: 100,
            stall_ceiling_ms: 2000,
            reopen_after_failures: 90, // ~3s of silence at 30fps
            max_reconnect_attempts: 5,
            reconnect_backoff_ms: 250,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "rtsp://127.0.0.1:8554/mystream".into(),
            rtsp_transport: "tcp".into(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".into(),
            codec: "libx264".into(),
            preset: "veryfast".into(),
            tune: "zerolatency".into(),
            bitrate: "2M".into(),
            threads: 2,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: PixelFormat::Bgr24,
            title: "RTSP Receiver".into(),
            read_timeout_ms: 1000,
            poll_timeout_ms: 1,
        }
    }
}

impl Config {
    /// Load defaults, then the optional TOML file, then `CAMLINK__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`Config::load`], reading overrides from `env` instead of the process environment.
    fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        self.capture.profile()?;
        self.display.profile()?;
        if self.capture.fps == 0 {
            return Err(ConfigError::Invalid("capture.fps must be positive".into()));
        }
        if self.stream.endpoint.is_empty() {
            return Err(ConfigError::Invalid("stream.endpoint is empty".into()));
        }
        Ok(())
    }
}

impl CaptureConfig {
    pub fn profile(&self) -> Result<FrameProfile, ConfigError> {
        FrameProfile::new(self.width, self.height, self.format)
    }

    /// Tick period derived from the target frame rate
    pub fn interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }

    pub fn settings(&self) -> CaptureSettings {
        CaptureSettings {
            interval: self.interval(),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            stall_ceiling: Duration::from_millis(self.stall_ceiling_ms),
            reopen_after_failures: self.reopen_after_failures,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
        }
    }
}

impl DisplayConfig {
    pub fn profile(&self) -> Result<FrameProfile, ConfigError> {
        FrameProfile::new(self.width, self.height, self.format)
    }

    pub fn settings(&self) -> Result<ReceiverSettings, ConfigError> {
        Ok(ReceiverSettings {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            format: self.format,
            profile: Some(self.profile()?),
            title: self.title.clone(),
        })
    }
}
