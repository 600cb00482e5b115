//! Byte sinks: where accepted capture frames go.
//!
//! [`EncoderSink`] feeds an ffmpeg process over its stdin. The pipe is owned by
//! a writer thread behind a rendezvous channel, so a write that cannot start
//! within the stall ceiling surfaces as [`SinkError::Stalled`] instead of
//! blocking the capture loop forever.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::{SendTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::capture::frame::FrameProfile;
use crate::error::SinkError;
use crate::{EncoderConfig, StreamConfig};

/// Downstream consumer of one frame's bytes.
pub trait ByteSink {
    /// Take ownership of a frame buffer. May block (backpressure) or fail.
    fn write(&mut self, frame: Bytes) -> Result<(), SinkError>;

    /// Flush and release the sink. Safe to call more than once.
    fn close(&mut self) -> Result<(), SinkError>;
}

impl<K: ByteSink + ?Sized> ByteSink for Box<K> {
    fn write(&mut self, frame: Bytes) -> Result<(), SinkError> {
        (**self).write(frame)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        (**self).close()
    }
}

/// How long `close` waits for ffmpeg to exit after EOF before killing it
const ENCODER_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Build the ffmpeg command line that turns raw frames on stdin into an RTSP stream.
pub fn encoder_args(
    encoder: &EncoderConfig,
    stream: &StreamConfig,
    profile: &FrameProfile,
    fps: u32,
) -> Result<Vec<String>, SinkError> {
    let pixel_format = profile.format.ffmpeg_name().ok_or_else(|| {
        SinkError::Spawn(format!("{:?} cannot be fed as rawvideo", profile.format))
    })?;

    let video_size = format!("{}x{}", profile.width, profile.height);
    let framerate = fps.to_string();
    let threads = encoder.threads.to_string();

    #[rustfmt::skip]
    let args = [
        "-f", "rawvideo",
        "-pixel_format", pixel_format,
        "-video_size", video_size.as_str(),
        "-framerate", framerate.as_str(),
        "-i", "-",
        "-c:v", encoder.codec.as_str(),
        "-preset", encoder.preset.as_str(),
        "-tune", encoder.tune.as_str(),
        "-pix_fmt", "yuv420p",
        "-b:v", encoder.bitrate.as_str(),
        "-bufsize", encoder.bitrate.as_str(),
        "-maxrate", encoder.bitrate.as_str(),
        "-fflags", "nobuffer",
        "-flags", "low_delay",
        "-strict", "-2",
        "-probesize", "32",
        "-analyzeduration", "0",
        "-threads", threads.as_str(),
        "-f", "rtsp",
        "-rtsp_transport", stream.rtsp_transport.as_str(),
        stream.endpoint.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    Ok(args)
}

/// An ffmpeg encoder process reading raw frames from its stdin
pub struct EncoderSink {
    tx: Option<Sender<Bytes>>,
    writer: Option<JoinHandle<std::io::Result<u64>>>,
    child: Child,
    stall_ceiling: Duration,
    /// Set once a frame could not be handed over in time
    stalled: bool,
}

impl EncoderSink {
    pub fn spawn(
        encoder: &EncoderConfig,
        stream: &StreamConfig,
        profile: &FrameProfile,
        fps: u32,
        stall_ceiling: Duration,
    ) -> Result<Self, SinkError> {
        let args = encoder_args(encoder, stream, profile, fps)?;
        info!("Starting encoder: {} {}", encoder.program, args.join(" "));

        let mut child = Command::new(&encoder.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SinkError::Spawn(format!("{}: {e}", encoder.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SinkError::Spawn("encoder stdin was not piped".into()))?;

        // Zero capacity: a frame is only handed over once the previous one is fully written
        let (tx, rx) = flume::bounded::<Bytes>(0);
        let writer = thread::Builder::new()
            .name("encoder-writer".into())
            .spawn(move || pump(stdin, rx))?;

        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
            child,
            stall_ceiling,
            stalled: false,
        })
    }

    /// Join the writer thread. A writer stuck on a full pipe is unblocked by
    /// killing the encoder; after a stall that happens without waiting.
    fn join_writer(&mut self) -> Result<(), SinkError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        let grace = if self.stalled {
            Duration::ZERO
        } else {
            ENCODER_EXIT_GRACE
        };
        let deadline = Instant::now() + grace;
        while !writer.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        if !writer.is_finished() {
            warn!("Encoder is not draining its input, killing it");
            if let Err(e) = self.child.kill() {
                error!("Failed to kill encoder: {}", e);
            }
        }

        match writer.join() {
            Ok(Ok(frames)) => {
                info!("Encoder input closed after {} frames", frames);
                Ok(())
            }
            Ok(Err(e)) => Err(SinkError::Io(e)),
            Err(_) => Err(SinkError::Closed),
        }
    }

    fn wait_for_exit(&mut self) {
        let deadline = Instant::now() + ENCODER_EXIT_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!("Encoder exited with {}", status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
                Ok(None) => {
                    warn!("Encoder did not exit within {:?}, killing it", ENCODER_EXIT_GRACE);
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    return;
                }
                Err(e) => {
                    error!("Failed to wait for encoder: {}", e);
                    return;
                }
            }
        }
    }
}

fn pump(mut stdin: ChildStdin, rx: flume::Receiver<Bytes>) -> std::io::Result<u64> {
    let mut written = 0u64;
    for frame in rx.iter() {
        stdin.write_all(&frame)?;
        written += 1;
    }
    stdin.flush()?;
    debug!(frames = written, "encoder input drained");
    // stdin drops on return, which is the encoder's EOF
    Ok(written)
}

impl ByteSink for EncoderSink {
    fn write(&mut self, frame: Bytes) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        match tx.send_timeout(frame, self.stall_ceiling) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                self.stalled = true;
                Err(SinkError::Stalled(self.stall_ceiling))
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                // The writer hit a broken pipe; surface its error if it has one
                match self.writer.take().map(JoinHandle::join) {
                    Some(Ok(Err(e))) => Err(SinkError::Io(e)),
                    _ => Err(SinkError::Closed),
                }
            }
        }
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.tx.take().is_none() {
            return Ok(());
        }

        let result = self.join_writer();
        self.wait_for_exit();
        result
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        if self.tx.is_some() {
            if let Err(e) = self.close() {
                warn!("Encoder close failed: {}", e);
            }
        }
    }
}
