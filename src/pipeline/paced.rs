//! Fixed-rate capture loop.
//!
//! One read per tick, validated, then moved into the sink. Ticks that fire
//! while the previous iteration is still running are dropped, never queued,
//! and two writes are never issued less than one interval apart.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::shutdown::CancellationToken;
use super::sink::ByteSink;
use crate::capture::frame::{Frame, FrameProfile, RawFrame};
use crate::capture::validate::{validate, Rejection};
use crate::capture::FrameSource;
use crate::error::{ExitReason, SourceError};

/// Timing and recovery knobs for [`PacedCapture`].
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub interval: Duration,
    /// Upper bound on a single `FrameSource::read`
    pub read_timeout: Duration,
    /// A sink write taking longer than this is treated as a closed sink
    pub stall_ceiling: Duration,
    /// Consecutive transient failures before the source is reopened (0 = never)
    pub reopen_after_failures: u32,
    pub max_reconnect_attempts: u32,
    /// First reopen delay; doubles per attempt up to 8x
    pub reconnect_backoff: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_micros(33_333),
            read_timeout: Duration::from_millis(100),
            stall_ceiling: Duration::from_secs(2),
            reopen_after_failures: 90,
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_millis(250),
        }
    }
}

/// Liveness and error counters for one capture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub ticks: u64,
    pub forwarded: u64,
    pub transient_errors: u64,
    pub rejected: u64,
    pub dropped_ticks: u64,
    pub reconnects: u64,
}

/// Drives a [`FrameSource`] into a [`ByteSink`] on a fixed clock.
pub struct PacedCapture<S, K> {
    source: S,
    sink: K,
    profile: FrameProfile,
    settings: CaptureSettings,
    stats: CaptureStats,
    /// Sequence of the last frame the sink accepted
    sequence: u64,
    consecutive_failures: u32,
    last_write: Option<Instant>,
}

impl<S: FrameSource, K: ByteSink> PacedCapture<S, K> {
    pub fn new(source: S, sink: K, profile: FrameProfile, settings: CaptureSettings) -> Self {
        Self {
            source,
            sink,
            profile,
            settings,
            stats: CaptureStats::default(),
            sequence: 0,
            consecutive_failures: 0,
            last_write: None,
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Number of frames the sink has accepted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn into_parts(self) -> (S, K) {
        (self.source, self.sink)
    }

    /// Run until cancelled or until the sink or source fails for good.
    ///
    /// The sink is closed on every exit path.
    pub fn run(&mut self, token: &CancellationToken) -> ExitReason {
        info!(
            width = self.profile.width,
            height = self.profile.height,
            interval_ms = self.settings.interval.as_secs_f64() * 1000.0,
            "capture loop started"
        );

        let ticker = crossbeam::channel::tick(self.settings.interval);
        let mut busy_until = Instant::now();

        let reason = loop {
            if token.is_cancelled() {
                break ExitReason::Cancelled(token.reason());
            }

            let tick = match ticker.recv() {
                Ok(tick) => tick,
                Err(_) => break ExitReason::SourceClosed("capture clock stopped".into()),
            };
            if token.is_cancelled() {
                break ExitReason::Cancelled(token.reason());
            }

            // Fired while the last iteration was still running
            if tick < busy_until {
                self.stats.dropped_ticks += 1;
                metrics::counter!("capture_ticks_dropped").increment(1);
                trace!("dropped stale tick");
                continue;
            }

            self.stats.ticks += 1;
            metrics::counter!("capture_ticks").increment(1);

            let outcome = self.tick(token);
            busy_until = Instant::now();
            if let Some(reason) = outcome {
                break reason;
            }
        };

        if let Err(e) = self.sink.close() {
            warn!("Failed to close sink: {}", e);
        }

        match &reason {
            ExitReason::Cancelled(why) => info!(%why, stats = ?self.stats, "capture loop stopped"),
            fatal => error!(reason = %fatal, stats = ?self.stats, "capture loop failed"),
        }
        reason
    }

    fn tick(&mut self, token: &CancellationToken) -> Option<ExitReason> {
        let raw = match self.source.read(self.settings.read_timeout) {
            Ok(raw) => raw,
            Err(e) if e.is_transient() => return self.on_transient(&e, token),
            Err(e) => {
                warn!("Source failed: {}", e);
                return self.reconnect(token).err();
            }
        };

        match validate(&raw, &self.profile) {
            Ok(()) => {}
            Err(Rejection::EmptyFrame) => return self.on_transient(&SourceError::Empty, token),
            Err(rejection) => {
                // Devices report degraded frames transiently; skip without stopping
                self.stats.rejected += 1;
                metrics::counter!("capture_frames_rejected").increment(1);
                warn!("{}", rejection);
                return None;
            }
        }

        self.consecutive_failures = 0;
        self.forward(raw, token)
    }

    fn on_transient(&mut self, e: &SourceError, token: &CancellationToken) -> Option<ExitReason> {
        self.stats.transient_errors += 1;
        self.consecutive_failures += 1;
        metrics::counter!("capture_transient_errors").increment(1);

        if self.consecutive_failures == 1 {
            warn!("Cannot read device or frame empty: {}", e);
        } else {
            debug!(streak = self.consecutive_failures, "read failed: {}", e);
        }

        let limit = self.settings.reopen_after_failures;
        if limit > 0 && self.consecutive_failures >= limit {
            warn!("{} consecutive read failures, reopening source", limit);
            return self.reconnect(token).err();
        }
        None
    }

    fn forward(&mut self, raw: RawFrame, token: &CancellationToken) -> Option<ExitReason> {
        let sequence = self.sequence + 1;
        let frame = Frame::accept(raw, self.profile.format, sequence);

        self.pace();
        if token.is_cancelled() {
            return Some(ExitReason::Cancelled(token.reason()));
        }

        let started = Instant::now();
        self.last_write = Some(started);
        if let Err(e) = self.sink.write(frame.data) {
            error!("Failed to write frame to encoder: {}", e);
            return Some(ExitReason::SinkClosed(e.to_string()));
        }
        let elapsed = started.elapsed();

        self.sequence = sequence;
        self.stats.forwarded += 1;
        metrics::counter!("capture_frames_forwarded").increment(1);
        metrics::histogram!("capture_write_time_us").record(elapsed.as_micros() as f64);
        trace!(
            sequence,
            latency_us = frame.timestamp.elapsed().as_micros() as u64,
            "frame forwarded"
        );

        if elapsed > self.settings.stall_ceiling {
            error!("Sink blocked for {:?}, treating it as closed", elapsed);
            return Some(ExitReason::SinkClosed(format!(
                "write blocked for {elapsed:?} (ceiling {:?})",
                self.settings.stall_ceiling
            )));
        }
        None
    }

    /// Hold the next write until one interval after the previous one.
    fn pace(&self) {
        if let Some(last) = self.last_write {
            let earliest = last + self.settings.interval;
            let now = Instant::now();
            if now < earliest {
                thread::sleep(earliest - now);
            }
        }
    }

    fn reconnect(&mut self, token: &CancellationToken) -> Result<(), ExitReason> {
        self.source.close();
        self.consecutive_failures = 0;

        let attempts = self.settings.max_reconnect_attempts;
        let mut backoff = self.settings.reconnect_backoff;
        let max_backoff = backoff * 8;
        let mut last_error = SourceError::Closed;

        for attempt in 1..=attempts {
            if !sleep_unless_cancelled(backoff, self.settings.interval, token) {
                return Err(ExitReason::Cancelled(token.reason()));
            }

            match self.source.open() {
                Ok(()) => {
                    self.stats.reconnects += 1;
                    metrics::counter!("capture_reconnects").increment(1);
                    info!(attempt, "Source reopened");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, "Reopen failed: {}", e);
                    last_error = e;
                }
            }
            backoff = (backoff * 2).min(max_backoff);
        }

        Err(ExitReason::SourceClosed(format!(
            "gave up after {attempts} reopen attempts: {last_error}"
        )))
    }
}

/// Sleep `total` in slices of at most `slice`. Returns `false` if the token fired.
fn sleep_unless_cancelled(total: Duration, slice: Duration, token: &CancellationToken) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(slice.max(Duration::from_millis(1))));
    }
}
