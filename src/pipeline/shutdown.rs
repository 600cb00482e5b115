//! One-shot cancellation shared by the capture and receive loops.
//!
//! The token is a single atomic: loops poll it, the signal task and the
//! display's exit event write it. The first writer wins and the value never
//! reverts.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Why the pipeline was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CancelReason {
    None = 0,
    UserInterrupt = 1,
    OsSignal = 2,
}

impl CancelReason {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CancelReason::UserInterrupt,
            2 => CancelReason::OsSignal,
            _ => CancelReason::None,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::None => f.write_str("none"),
            CancelReason::UserInterrupt => f.write_str("user interrupt"),
            CancelReason::OsSignal => f.write_str("os signal"),
        }
    }
}

/// Cloneable handle to a write-once cancellation latch.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<AtomicU8>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the token. Returns `true` only for the call that set it.
    ///
    /// `CancelReason::None` is not a reason to stop and is ignored.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if reason == CancelReason::None {
            return false;
        }
        self.state
            .compare_exchange(
                CancelReason::None as u8,
                reason as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) != CancelReason::None as u8
    }

    pub fn reason(&self) -> CancelReason {
        CancelReason::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish()
    }
}

/// Feeds OS signals and UI exit requests into one [`CancellationToken`].
#[derive(Debug, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle for a loop to poll.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown from outside the signal path (e.g. a window close).
    pub fn trip(&self, reason: CancelReason) -> bool {
        let first = self.token.cancel(reason);
        if first {
            info!(%reason, "shutdown requested");
        } else {
            debug!(%reason, current = %self.token.reason(), "shutdown already requested");
        }
        first
    }

    /// Spawn a task that latches the token on SIGINT or SIGTERM.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen(&self) -> std::io::Result<JoinHandle<()>> {
        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        let token = self.token.clone();
        Ok(tokio::spawn(async move {
            #[cfg(unix)]
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        tracing::error!("Failed to listen for ctrl-c: {}", e);
                        return;
                    }
                }
                _ = terminate.recv() => {}
            }

            #[cfg(not(unix))]
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                return;
            }

            if token.cancel(CancelReason::OsSignal) {
                info!("Interrupt received, shutting down");
            }
        }))
    }
}
