//! SDL2 Window Display Module
//! Creates an SDL2 window and streams received frames into it.
//! The window title doubles as the status surface for the FPS readout.

use std::time::Duration;

use sdl2::event::{Event, WindowEvent};
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::{debug, info};

use super::DisplaySink;
use crate::capture::frame::{Frame, FrameProfile, PixelFormat};
use crate::error::DisplayError;

/// SDL2 Window Display
/// Handles window creation, event polling, and frame rendering.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    profile: FrameProfile,
    texture_format: PixelFormatEnum,
}

fn render_err(e: impl ToString) -> DisplayError {
    DisplayError::Render(e.to_string())
}

/// The window's texture is laid out by the profile; frames must match it.
fn check_fits(frame: &Frame, profile: &FrameProfile) -> Result<(), DisplayError> {
    if frame.meta.width != profile.width || frame.meta.height != profile.height {
        return Err(render_err(format!(
            "frame is {}x{}, window texture is {}x{}",
            frame.meta.width, frame.meta.height, profile.width, profile.height
        )));
    }
    if frame.data.len() < profile.pitch() * profile.height as usize {
        return Err(render_err(format!(
            "frame has {} bytes, texture needs {}",
            frame.data.len(),
            profile.expected_byte_size()
        )));
    }
    Ok(())
}

impl Sdl2Display {
    pub fn new(
        sdl_context: &sdl2::Sdl,
        title: &str,
        profile: FrameProfile,
    ) -> Result<Self, DisplayError> {
        let texture_format = match profile.format {
            PixelFormat::Rgb24 => PixelFormatEnum::RGB24,
            PixelFormat::Bgr24 => PixelFormatEnum::BGR24,
            PixelFormat::Yuyv4 => PixelFormatEnum::YUY2,
            other => return Err(render_err(format!("cannot display {other:?} frames"))),
        };

        let video_subsystem = sdl_context.video().map_err(render_err)?;

        let window = video_subsystem
            .window(title, profile.width, profile.height)
            .position_centered()
            .resizable()
            .build()
            .map_err(render_err)?;

        let canvas = window.into_canvas().present_vsync().build().map_err(render_err)?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump().map_err(render_err)?;

        info!(
            "Display window {}x{} ({:?}) ready",
            profile.width, profile.height, profile.format
        );

        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            profile,
            texture_format,
        })
    }

    fn is_exit(event: &Event) -> bool {
        matches!(
            event,
            Event::Quit { .. }
                | Event::KeyDown { .. }
                | Event::Window {
                    win_event: WindowEvent::Close,
                    ..
                }
        )
    }
}

impl DisplaySink for Sdl2Display {
    fn show(&mut self, frame: Frame) -> Result<(), DisplayError> {
        check_fits(&frame, &self.profile)?;

        let mut texture = self
            .texture_creator
            .create_texture_streaming(self.texture_format, self.profile.width, self.profile.height)
            .map_err(render_err)?;

        texture
            .update(None, &frame.data, self.profile.pitch())
            .map_err(render_err)?;

        self.canvas.clear();
        self.canvas.copy(&texture, None, None).map_err(render_err)?;
        self.canvas.present();
        Ok(())
    }

    fn set_status_text(&mut self, text: &str) -> Result<(), DisplayError> {
        self.canvas.window_mut().set_title(text).map_err(render_err)
    }

    fn poll_exit_event(&mut self, timeout: Duration) -> Result<bool, DisplayError> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let mut exit = match self.event_pump.wait_event_timeout(millis) {
            Some(event) => Self::is_exit(&event),
            None => false,
        };

        // Drain whatever else queued up so the window stays responsive
        for event in self.event_pump.poll_iter() {
            if Self::is_exit(&event) {
                exit = true;
            }
        }

        if exit {
            debug!("exit event received");
        }
        Ok(exit)
    }
}
