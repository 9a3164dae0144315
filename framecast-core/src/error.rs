//! Domain-specific error types for the frame pipeline.
//!
//! Fallible internal operations return `Result<T, FrameError>`. The
//! pipeline's tick entry points never surface these to the caller; they
//! are logged and recovered locally so the host's frame loop keeps running.

use std::time::Duration;
use thiserror::Error;

use crate::format::KernelPass;

/// The canonical error type for the frame pipeline.
#[derive(Debug, Error)]
pub enum FrameError {
    // ── Conversion Errors ────────────────────────────────────────
    /// The source image has a zero dimension.
    #[error("invalid source image: {width}x{height}")]
    InvalidSource { width: u32, height: u32 },

    /// The conversion backend cannot resolve the requested kernel pass.
    #[error("conversion kernel unavailable for {0}")]
    KernelUnavailable(KernelPass),

    /// The backend failed to allocate a scratch image.
    #[error("scratch allocation failed: {width}x{height}")]
    Allocation { width: u32, height: u32 },

    // ── Transfer Errors ──────────────────────────────────────────
    /// The device-to-host transfer reported a driver-level failure.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// A blocking wait exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Sender Errors ────────────────────────────────────────────
    /// The native sender subsystem is not present.
    #[error("native sender unavailable")]
    SenderUnavailable,

    /// The native sender refused to create an instance.
    #[error("failed to create sender {name:?}")]
    SenderCreate { name: String },

    /// The sender worker is gone.
    #[error("sender closed")]
    SenderClosed,

    // ── Transport Errors ─────────────────────────────────────────
    /// The socket layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram could not be decoded.
    #[error("malformed datagram: {0}")]
    Malformed(String),

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

// ── EnqueueRejected ───────────────────────────────────────────────

/// Reason a readback enqueue was refused.
///
/// Neither variant is a failure: both are the backpressure and
/// de-duplication signals of the readback queue, and the candidate
/// frame is simply dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueRejected {
    /// The queue already holds `depth` in-flight requests.
    #[error("readback queue full ({depth} requests in flight)")]
    QueueFull { depth: usize },

    /// A request was already created during this tick.
    #[error("tick {tick} already enqueued a frame")]
    DuplicateTick { tick: u64 },
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for FrameError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        FrameError::SenderClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for FrameError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        FrameError::SenderClosed
    }
}
