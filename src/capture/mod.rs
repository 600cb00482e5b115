pub mod decoder;
pub mod frame;
pub mod v4l2;
pub mod validate;

use std::time::Duration;

pub use frame::{Frame, FrameMetadata, FrameProfile, PixelFormat, RawFrame};
pub use v4l2::V4l2Capture;
pub use validate::{validate, Rejection};

use crate::error::SourceError;

/// A device or decoder that hands out raw frames on demand.
pub trait FrameSource {
    /// Acquire the device. Called again by the reconnect policy after `close`.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Wait at most `timeout` for the next frame.
    fn read(&mut self, timeout: Duration) -> Result<RawFrame, SourceError>;

    /// Release the device. Must be safe to call when already closed.
    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<(), SourceError> {
        (**self).open()
    }

    fn read(&mut self, timeout: Duration) -> Result<RawFrame, SourceError> {
        (**self).read(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
