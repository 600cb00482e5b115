//! Shape checks applied before a frame is trusted downstream.

use thiserror::Error;

use super::frame::{FrameProfile, RawFrame};

/// Why a frame was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("empty frame")]
    EmptyFrame,

    #[error(
        "unexpected frame size: {}x{}, expected {}x{}",
        .actual.0, .actual.1, .expected.0, .expected.1
    )]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("unexpected frame byte size: got {actual}, expected {expected}")]
    ByteSizeMismatch { expected: usize, actual: usize },
}

/// Check `frame` against `profile`. Pure; calling it twice gives the same answer.
pub fn validate(frame: &RawFrame, profile: &FrameProfile) -> Result<(), Rejection> {
    if frame.data.is_empty() || frame.width == 0 || frame.height == 0 {
        return Err(Rejection::EmptyFrame);
    }

    if frame.width != profile.width || frame.height != profile.height {
        return Err(Rejection::DimensionMismatch {
            expected: (profile.width, profile.height),
            actual: (frame.width, frame.height),
        });
    }

    let expected = profile.expected_byte_size();
    if frame.data.len() != expected {
        return Err(Rejection::ByteSizeMismatch {
            expected,
            actual: frame.data.len(),
        });
    }

    Ok(())
}
