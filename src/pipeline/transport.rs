//! Receiving side of the stream: decoded frames coming back out of the transport.

use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::capture::frame::{FrameProfile, RawFrame};
use crate::error::SourceError;
use crate::{EncoderConfig, StreamConfig};

/// Decoded frames arriving from the network/decoder layer.
pub trait FrameTransportSource {
    /// Wait at most `timeout` for the next decoded frame.
    fn read(&mut self, timeout: Duration) -> Result<RawFrame, SourceError>;
}

impl<T: FrameTransportSource + ?Sized> FrameTransportSource for Box<T> {
    fn read(&mut self, timeout: Duration) -> Result<RawFrame, SourceError> {
        (**self).read(timeout)
    }
}

/// Frames buffered between the decoder's stdout and the receive loop
const DECODED_FRAME_BACKLOG: usize = 2;

/// Build the ffmpeg command line that decodes the stream into raw frames on stdout.
pub fn decoder_args(
    stream: &StreamConfig,
    profile: &FrameProfile,
) -> Result<Vec<String>, SourceError> {
    let pixel_format = profile.format.ffmpeg_name().ok_or_else(|| {
        SourceError::Open(format!("{:?} cannot be decoded to rawvideo", profile.format))
    })?;
    let scale = format!("scale={}:{}", profile.width, profile.height);

    #[rustfmt::skip]
    let args = [
        "-hide_banner",
        "-loglevel", "error",
        "-rtsp_transport", stream.rtsp_transport.as_str(),
        "-fflags", "nobuffer",
        "-flags", "low_delay",
        "-i", stream.endpoint.as_str(),
        "-an",
        "-vf", scale.as_str(),
        "-f", "rawvideo",
        "-pix_fmt", pixel_format,
        "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    Ok(args)
}

/// An ffmpeg process decoding the RTSP stream into fixed-size raw frames.
pub struct DecoderSource {
    rx: Receiver<Bytes>,
    /// Exits on decoder EOF or once `rx` is dropped
    _reader: JoinHandle<()>,
    child: Child,
    profile: FrameProfile,
}

impl DecoderSource {
    pub fn spawn(
        decoder: &EncoderConfig,
        stream: &StreamConfig,
        profile: FrameProfile,
    ) -> Result<Self, SourceError> {
        let args = decoder_args(stream, &profile)?;
        info!("Starting decoder: {} {}", decoder.program, args.join(" "));

        let mut child = Command::new(&decoder.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SourceError::Open(format!("{}: {e}", decoder.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Open("decoder stdout was not piped".into()))?;

        let (tx, rx) = flume::bounded(DECODED_FRAME_BACKLOG);
        let frame_size = profile.expected_byte_size();
        let reader = thread::Builder::new()
            .name("decoder-reader".into())
            .spawn(move || read_frames(stdout, frame_size, tx))
            .map_err(|e| SourceError::Open(format!("reader thread: {e}")))?;

        Ok(Self {
            rx,
            _reader: reader,
            child,
            profile,
        })
    }
}

fn read_frames(mut stdout: ChildStdout, frame_size: usize, tx: Sender<Bytes>) {
    let mut frames = 0u64;
    loop {
        let mut buf = BytesMut::zeroed(frame_size);
        match stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("Decoder output ended after {} frames", frames);
                return;
            }
            Err(e) => {
                warn!("Decoder read failed: {}", e);
                return;
            }
        }
        frames += 1;
        if tx.send(buf.freeze()).is_err() {
            debug!("receive loop gone, stopping decoder reader");
            return;
        }
    }
}

impl FrameTransportSource for DecoderSource {
    fn read(&mut self, timeout: Duration) -> Result<RawFrame, SourceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(data) => Ok(RawFrame::new(data, self.profile.width, self.profile.height)),
            Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Closed),
        }
    }
}

impl Drop for DecoderSource {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("decoder already exited: {}", e);
        }
        let _ = self.child.wait();
    }
}
