pub mod display;

use std::time::Duration;

pub use display::Sdl2Display;

use crate::capture::frame::Frame;
use crate::error::DisplayError;

/// A rendering surface plus the user's way of asking to quit.
pub trait DisplaySink {
    /// Present a frame. Takes ownership; the buffer is released once shown.
    fn show(&mut self, frame: Frame) -> Result<(), DisplayError>;

    /// Update the status surface (window title, overlay).
    fn set_status_text(&mut self, text: &str) -> Result<(), DisplayError>;

    /// Wait at most `timeout` for a key press or window close.
    fn poll_exit_event(&mut self, timeout: Duration) -> Result<bool, DisplayError>;
}

impl<D: DisplaySink + ?Sized> DisplaySink for Box<D> {
    fn show(&mut self, frame: Frame) -> Result<(), DisplayError> {
        (**self).show(frame)
    }

    fn set_status_text(&mut self, text: &str) -> Result<(), DisplayError> {
        (**self).set_status_text(text)
    }

    fn poll_exit_event(&mut self, timeout: Duration) -> Result<bool, DisplayError> {
        (**self).poll_exit_event(timeout)
    }
}
