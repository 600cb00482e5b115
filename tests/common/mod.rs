//! Scripted sources, sinks and displays for driving the loops without hardware.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use camlink::capture::{FrameProfile, FrameSource, PixelFormat, RawFrame};
use camlink::display::DisplaySink;
use camlink::error::{DisplayError, SinkError, SourceError};
use camlink::pipeline::{ByteSink, CancelReason, CancellationToken, FrameTransportSource};
use camlink::Frame;

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 2;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camlink=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn profile() -> FrameProfile {
    FrameProfile::new(WIDTH, HEIGHT, PixelFormat::Bgr24).unwrap()
}

/// A frame of exactly the test profile's size.
pub fn good_frame() -> RawFrame {
    RawFrame::new(vec![0x40u8; profile().expected_byte_size()], WIDTH, HEIGHT)
}

/// One byte short of the test profile.
pub fn short_frame() -> RawFrame {
    RawFrame::new(vec![0x40u8; profile().expected_byte_size() - 1], WIDTH, HEIGHT)
}

pub enum Step {
    Frame(RawFrame),
    Fail(SourceError),
}

pub fn frames(n: usize) -> Vec<Step> {
    (0..n).map(|_| Step::Frame(good_frame())).collect()
}

/// Plays back a fixed script of reads. Once exhausted it latches the token
/// and reports timeouts, so a forgotten stop condition cannot hang a test.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    open_results: VecDeque<Result<(), SourceError>>,
    latency: Duration,
    token: CancellationToken,
    pub reads: usize,
    pub opens: usize,
    pub closes: usize,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>, token: &CancellationToken) -> Self {
        Self {
            steps: steps.into(),
            open_results: VecDeque::new(),
            latency: Duration::ZERO,
            token: token.clone(),
            reads: 0,
            opens: 0,
            closes: 0,
        }
    }

    /// Results handed out by successive `open` calls; `Ok` once these run out.
    pub fn with_open_results(mut self, results: Vec<Result<(), SourceError>>) -> Self {
        self.open_results = results.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<(), SourceError> {
        self.opens += 1;
        self.open_results.pop_front().unwrap_or(Ok(()))
    }

    fn read(&mut self, timeout: Duration) -> Result<RawFrame, SourceError> {
        self.reads += 1;
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        match self.steps.pop_front() {
            Some(Step::Frame(raw)) => Ok(raw),
            Some(Step::Fail(e)) => Err(e),
            None => {
                self.token.cancel(CancelReason::UserInterrupt);
                Err(SourceError::Timeout(timeout))
            }
        }
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}

/// Endless source of well-formed frames.
pub struct SteadySource;

impl FrameSource for SteadySource {
    fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<RawFrame, SourceError> {
        Ok(good_frame())
    }

    fn close(&mut self) {}
}

#[derive(Debug, Clone, Default)]
pub struct SinkLog {
    pub writes: Vec<(Instant, usize)>,
    pub closed: bool,
}

/// Records every write; optionally latches the token after `n` writes.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub log: Arc<Mutex<SinkLog>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_after(n: usize, token: &CancellationToken) -> Self {
        Self {
            log: Arc::default(),
            cancel_after: Some((n, token.clone())),
        }
    }

    pub fn snapshot(&self) -> SinkLog {
        self.log.lock().unwrap().clone()
    }
}

impl ByteSink for RecordingSink {
    fn write(&mut self, frame: Bytes) -> Result<(), SinkError> {
        let mut log = self.log.lock().unwrap();
        log.writes.push((Instant::now(), frame.len()));
        if let Some((n, token)) = &self.cancel_after {
            if log.writes.len() >= *n {
                token.cancel(CancelReason::UserInterrupt);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Accepts `ok_writes` frames, then reports a closed pipe.
pub struct FailingSink {
    ok_writes: usize,
    pub writes: usize,
    pub closed: bool,
}

impl FailingSink {
    pub fn after(ok_writes: usize) -> Self {
        Self {
            ok_writes,
            writes: 0,
            closed: false,
        }
    }
}

impl ByteSink for FailingSink {
    fn write(&mut self, _frame: Bytes) -> Result<(), SinkError> {
        if self.writes >= self.ok_writes {
            return Err(SinkError::Closed);
        }
        self.writes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        Ok(())
    }
}

/// Every write takes `delay`, like an encoder that stopped draining its pipe.
pub struct SlowSink {
    pub delay: Duration,
    pub writes: usize,
}

impl ByteSink for SlowSink {
    fn write(&mut self, _frame: Bytes) -> Result<(), SinkError> {
        thread::sleep(self.delay);
        self.writes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Transport counterpart of [`ScriptedSource`]. Reports `Closed` when exhausted.
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    delay: Duration,
    pub reads: usize,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            delay: Duration::ZERO,
            reads: 0,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl FrameTransportSource for ScriptedTransport {
    fn read(&mut self, _timeout: Duration) -> Result<RawFrame, SourceError> {
        self.reads += 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        match self.steps.pop_front() {
            Some(Step::Frame(mut raw)) => {
                raw.timestamp = Instant::now();
                Ok(raw)
            }
            Some(Step::Fail(e)) => Err(e),
            None => Err(SourceError::Closed),
        }
    }
}

/// Keeps what it was shown; asks to exit once `exit_after` frames were shown.
#[derive(Default)]
pub struct RecordingDisplay {
    pub shown: Vec<(u64, usize)>,
    pub shown_at: Vec<Instant>,
    pub statuses: Vec<String>,
    pub polls: usize,
    exit_after: Option<usize>,
    fail_show: bool,
}

impl RecordingDisplay {
    pub fn exit_after(n: usize) -> Self {
        Self {
            exit_after: Some(n),
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_show: true,
            ..Self::default()
        }
    }
}

impl DisplaySink for RecordingDisplay {
    fn show(&mut self, frame: Frame) -> Result<(), DisplayError> {
        if self.fail_show {
            return Err(DisplayError::Render("no renderer".into()));
        }
        self.shown.push((frame.meta.sequence, frame.data.len()));
        self.shown_at.push(Instant::now());
        Ok(())
    }

    fn set_status_text(&mut self, text: &str) -> Result<(), DisplayError> {
        self.statuses.push(text.to_string());
        Ok(())
    }

    fn poll_exit_event(&mut self, _timeout: Duration) -> Result<bool, DisplayError> {
        self.polls += 1;
        Ok(self.exit_after.is_some_and(|n| self.shown.len() >= n))
    }
}
