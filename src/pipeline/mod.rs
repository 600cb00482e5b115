pub mod paced;
pub mod receiver;
pub mod shutdown;
pub mod sink;
pub mod transport;

pub use paced::{CaptureSettings, CaptureStats, PacedCapture};
pub use receiver::{FrameReceiver, ReceiverSettings, ReceiverStats, ThroughputCounter};
pub use shutdown::{CancelReason, CancellationToken, ShutdownController};
pub use sink::{ByteSink, EncoderSink};
pub use transport::{DecoderSource, FrameTransportSource};
