//! V4L2 camera capture with memory-mapped buffers

use std::io;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder;
use super::frame::{FrameProfile, PixelFormat, RawFrame};
use super::FrameSource;
use crate::error::SourceError;
use crate::CaptureConfig;

/// Camera source producing frames in the profile's layout
pub struct V4l2Capture {
    device: Option<Box<Device>>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    profile: FrameProfile,
    /// Format the driver actually agreed to
    native: PixelFormat,
    width: u32,
    height: u32,
}

impl V4l2Capture {
    /// Create a capture bound to `config.device`. The device is opened by [`FrameSource::open`].
    pub fn new(config: CaptureConfig, profile: FrameProfile) -> Self {
        Self {
            device: None,
            stream: None,
            native: config.device.format,
            width: config.width,
            height: config.height,
            config,
            profile,
        }
    }

    fn fourcc_for(format: PixelFormat) -> Result<FourCC, SourceError> {
        match format {
            PixelFormat::Mjpeg => Ok(FourCC::new(b"MJPG")),
            PixelFormat::Yuyv4 => Ok(FourCC::new(b"YUYV")),
            PixelFormat::Rgb24 => Ok(FourCC::new(b"RGB3")),
            PixelFormat::Bgr24 => Ok(FourCC::new(b"BGR3")),
            PixelFormat::Nv12 => Err(SourceError::Open("NV12 capture is not supported".into())),
        }
    }

    fn format_for(fourcc: FourCC) -> Option<PixelFormat> {
        match &fourcc.repr {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv4),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            _ => None,
        }
    }

    fn open_err(context: &str, e: io::Error) -> SourceError {
        SourceError::Open(format!("{context}: {e}"))
    }

    fn read_err(e: io::Error, timeout: Duration) -> SourceError {
        if e.kind() == io::ErrorKind::TimedOut {
            return SourceError::Timeout(timeout);
        }
        match e.raw_os_error() {
            Some(libc::ENODEV) | Some(libc::ENXIO) => SourceError::Closed,
            _ => SourceError::Device(e.to_string()),
        }
    }
}

impl FrameSource for V4l2Capture {
    #[instrument(skip(self), fields(device = %self.config.device.path))]
    fn open(&mut self) -> Result<(), SourceError> {
        let path = &self.config.device.path;
        let device = Device::with_path(path).map_err(|e| Self::open_err("open", e))?;

        // Query capabilities
        let caps = device
            .query_caps()
            .map_err(|e| Self::open_err("query capabilities", e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(SourceError::Open(
                "device doesn't support video capture".into(),
            ));
        }

        // Request size and format, then read back what the driver picked
        let mut fmt = device
            .format()
            .map_err(|e| Self::open_err("read format", e))?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = Self::fourcc_for(self.config.device.format)?;
        let fmt = device
            .set_format(&fmt)
            .map_err(|e| Self::open_err("set format", e))?;

        let native = Self::format_for(fmt.fourcc).ok_or_else(|| {
            SourceError::Open(format!("driver chose unsupported format {}", fmt.fourcc))
        })?;

        let params = device
            .set_params(&Parameters::with_fps(self.config.fps))
            .map_err(|e| Self::open_err("set frame rate", e))?;
        let fps = if params.interval.numerator == 0 {
            0.0
        } else {
            f64::from(params.interval.denominator) / f64::from(params.interval.numerator)
        };

        info!(
            "Webcam initialized with frame size: {}x{} ({}) and FPS: {:.2}",
            fmt.width, fmt.height, fmt.fourcc, fps
        );
        if fmt.width != self.profile.width || fmt.height != self.profile.height {
            warn!(
                "Device negotiated {}x{}, frames will not match the {}x{} profile",
                fmt.width, fmt.height, self.profile.width, self.profile.height
            );
        }

        let stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, self.config.buffer_count)
                .map_err(|e| Self::open_err("map buffers", e))?;

        self.native = native;
        self.width = fmt.width;
        self.height = fmt.height;
        self.stream = Some(stream);
        self.device = Some(Box::new(device));
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<RawFrame, SourceError> {
        let stream = self.stream.as_mut().ok_or(SourceError::Closed)?;
        stream.set_timeout(timeout);

        let (buf, meta) = stream.next().map_err(|e| Self::read_err(e, timeout))?;
        let used = (meta.bytesused as usize).min(buf.len());
        debug!(sequence = meta.sequence, bytes = used, "dequeued buffer");

        decoder::decode_frame(
            &buf[..used],
            self.native,
            self.width,
            self.height,
            self.profile.format,
        )
    }

    fn close(&mut self) {
        // Dropping the stream stops streaming and unmaps the buffers
        if self.stream.take().is_some() {
            info!("Capture stream stopped");
        }
        self.device = None;
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        self.close();
    }
}
