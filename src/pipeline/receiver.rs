//! Receive loop: transport → display, with a once-per-second FPS readout.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::shutdown::{CancelReason, CancellationToken};
use super::transport::FrameTransportSource;
use crate::capture::frame::{Frame, FrameProfile, PixelFormat, RawFrame};
use crate::capture::validate::validate;
use crate::display::DisplaySink;
use crate::error::ExitReason;

/// Length of one FPS measurement window
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Frames counted since the start of the current window.
///
/// The FPS value is only as fresh as the last window boundary.
#[derive(Debug, Clone)]
pub struct ThroughputCounter {
    window_start: Instant,
    frame_count: u64,
    last_fps: Option<f64>,
}

impl ThroughputCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frame_count: 0,
            last_fps: None,
        }
    }

    /// Count one frame seen at `now`. Returns the FPS when the window closes.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < FPS_WINDOW {
            return None;
        }

        let fps = self.frame_count as f64 / elapsed.as_secs_f64();
        self.window_start = now;
        self.frame_count = 0;
        self.last_fps = Some(fps);
        Some(fps)
    }

    /// Start a fresh window without publishing anything.
    pub fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.frame_count = 0;
    }

    /// FPS published at the last window boundary.
    pub fn fps(&self) -> Option<f64> {
        self.last_fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub read_timeout: Duration,
    /// Wait for UI events each iteration; zero or close to it
    pub poll_timeout: Duration,
    /// Layout the transport delivers
    pub format: PixelFormat,
    /// When set, frames that do not match are skipped
    pub profile: Option<FrameProfile>,
    /// Prefix of the status text, e.g. "RTSP Receiver"
    pub title: String,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(1),
            format: PixelFormat::Bgr24,
            profile: None,
            title: "RTSP Receiver".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub displayed: u64,
    pub timeouts: u64,
    pub rejected: u64,
    pub fps_updates: u64,
}

/// Pulls decoded frames and shows them, publishing throughput once per window.
pub struct FrameReceiver<T, D> {
    source: T,
    display: D,
    settings: ReceiverSettings,
    counter: ThroughputCounter,
    stats: ReceiverStats,
    sequence: u64,
}

impl<T: FrameTransportSource, D: DisplaySink> FrameReceiver<T, D> {
    pub fn new(source: T, display: D, settings: ReceiverSettings) -> Self {
        Self {
            source,
            display,
            settings,
            counter: ThroughputCounter::new(Instant::now()),
            stats: ReceiverStats::default(),
            sequence: 0,
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn fps(&self) -> Option<f64> {
        self.counter.fps()
    }

    pub fn into_parts(self) -> (T, D) {
        (self.source, self.display)
    }

    /// Run until the user or the OS asks to stop, or the transport/display dies.
    pub fn run(&mut self, token: &CancellationToken) -> ExitReason {
        info!(title = %self.settings.title, "receive loop started");
        self.counter.reset(Instant::now());

        let reason = loop {
            if token.is_cancelled() {
                break ExitReason::Cancelled(token.reason());
            }

            match self.source.read(self.settings.read_timeout) {
                Ok(raw) => {
                    if let Some(reason) = self.handle(raw, token) {
                        break reason;
                    }
                }
                Err(e) if e.is_transient() => {
                    // Network and decoder stalls are expected; try again
                    self.stats.timeouts += 1;
                    metrics::counter!("receiver_timeouts").increment(1);
                    warn!("Cannot read frame from stream: {}", e);
                }
                Err(e) => {
                    error!("Stream source failed: {}", e);
                    break ExitReason::SourceClosed(e.to_string());
                }
            }

            match self.display.poll_exit_event(self.settings.poll_timeout) {
                Ok(false) => {}
                Ok(true) => {
                    info!("Key pressed. Exiting...");
                    token.cancel(CancelReason::UserInterrupt);
                    break ExitReason::Cancelled(token.reason());
                }
                Err(e) => break ExitReason::DisplayClosed(e.to_string()),
            }
        };

        match &reason {
            ExitReason::Cancelled(why) => info!(%why, stats = ?self.stats, "receive loop stopped"),
            fatal => error!(reason = %fatal, stats = ?self.stats, "receive loop failed"),
        }
        reason
    }

    fn handle(&mut self, raw: RawFrame, token: &CancellationToken) -> Option<ExitReason> {
        if let Some(profile) = &self.settings.profile {
            if let Err(rejection) = validate(&raw, profile) {
                self.stats.rejected += 1;
                metrics::counter!("receiver_frames_rejected").increment(1);
                debug!("skipping frame: {}", rejection);
                return None;
            }
        }

        // Nothing reaches the display once shutdown is latched
        if token.is_cancelled() {
            return Some(ExitReason::Cancelled(token.reason()));
        }

        self.sequence += 1;
        let frame = Frame::accept(raw, self.settings.format, self.sequence);

        if let Err(e) = self.display.show(frame) {
            error!("Display error: {}", e);
            return Some(ExitReason::DisplayClosed(e.to_string()));
        }
        self.stats.displayed += 1;
        metrics::counter!("receiver_frames_displayed").increment(1);

        if let Some(fps) = self.counter.record(Instant::now()) {
            self.stats.fps_updates += 1;
            metrics::gauge!("receiver_fps").set(fps);
            let status = format!("{} - FPS: {:.2}", self.settings.title, fps);
            if let Err(e) = self.display.set_status_text(&status) {
                return Some(ExitReason::DisplayClosed(e.to_string()));
            }
        }
        None
    }
}
