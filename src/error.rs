//! Error types shared by the capture and receive loops.
//!
//! Transient conditions (`SourceError::{Timeout, Empty, Device}` and validation
//! rejections) never leave a loop. Fatal conditions end the owning loop with an
//! [`ExitReason`] naming the failing stage.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::shutdown::CancelReason;

/// Failure reading from a frame source or transport.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Nothing arrived within the read bound.
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    /// The device answered with zero bytes.
    #[error("source returned an empty frame")]
    Empty,

    /// A recoverable device or conversion hiccup.
    #[error("device error: {0}")]
    Device(String),

    /// The source is gone (device unplugged, decoder exited).
    #[error("source closed")]
    Closed,

    /// Opening the source failed.
    #[error("failed to open source: {0}")]
    Open(String),
}

impl SourceError {
    /// Transient errors are counted and skipped; anything else ends a read streak.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Timeout(_) | SourceError::Empty | SourceError::Device(_)
        )
    }
}

/// Failure writing to a byte sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,

    #[error("sink stalled for more than {0:?}")]
    Stalled(Duration),

    #[error("failed to start encoder: {0}")]
    Spawn(String),

    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("render failed: {0}")]
    Render(String),

    #[error("display closed")]
    Closed,
}

/// Configuration that cannot be loaded or does not describe a usable pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Pipeline stage named in terminal status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Sink,
    Display,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Source => f.write_str("source"),
            Stage::Sink => f.write_str("sink"),
            Stage::Display => f.write_str("display"),
        }
    }
}

/// Why a capture or receive loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The cancellation token was set. Not an error.
    Cancelled(CancelReason),
    SinkClosed(String),
    SourceClosed(String),
    DisplayClosed(String),
}

impl ExitReason {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExitReason::Cancelled(_))
    }

    /// The stage that failed, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ExitReason::Cancelled(_) => None,
            ExitReason::SinkClosed(_) => Some(Stage::Sink),
            ExitReason::SourceClosed(_) => Some(Stage::Source),
            ExitReason::DisplayClosed(_) => Some(Stage::Display),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Cancelled(reason) => write!(f, "cancelled ({reason})"),
            ExitReason::SinkClosed(detail) => write!(f, "{} failed: {detail}", Stage::Sink),
            ExitReason::SourceClosed(detail) => write!(f, "{} failed: {detail}", Stage::Source),
            ExitReason::DisplayClosed(detail) => {
                write!(f, "{} failed: {detail}", Stage::Display)
            }
        }
    }
}
