//! Interface to the GPU collaborator.
//!
//! The pipeline never touches pixels itself. It asks a
//! [`ConversionBackend`] to run a conversion pass into a scratch image,
//! then to start a non-blocking device-to-host [`Transfer`] of that
//! image. The transfer is polled (or awaited with a deadline) later.

use std::time::Duration;

use bytes::Bytes;

use crate::error::FrameError;
use crate::format::KernelPass;

/// Anything with pixel dimensions.
pub trait Surface {
    /// Width in pixels (texels for converted images).
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
}

// ── Transfer ─────────────────────────────────────────────────────

/// Completion state of a device-to-host transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Still in flight.
    Pending,
    /// Bytes are available via [`Transfer::read_bytes`].
    Done,
    /// The transfer resolved with a driver-level error.
    Failed,
}

impl TransferStatus {
    /// `true` once the transfer has either completed or failed.
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Handle to one asynchronous device-to-host copy.
pub trait Transfer {
    /// Non-blocking completion check.
    fn status(&mut self) -> TransferStatus;

    /// Block until the transfer resolves or `timeout` elapses.
    ///
    /// Returns [`TransferStatus::Pending`] on timeout.
    fn wait(&mut self, timeout: Duration) -> TransferStatus;

    /// Host-side bytes of a completed transfer.
    ///
    /// Fails with [`FrameError::Transfer`] if the transfer failed, and
    /// with [`FrameError::Timeout`] if it has not resolved yet.
    fn read_bytes(&mut self) -> Result<Bytes, FrameError>;
}

// ── ConversionBackend ────────────────────────────────────────────

/// The GPU conversion collaborator.
pub trait ConversionBackend {
    /// Source and scratch image type.
    type Image: Surface;
    /// Transfer handle type.
    type Transfer: Transfer;

    /// Allocate a scratch image of `width` x `height` 4-byte texels.
    fn allocate(&mut self, width: u32, height: u32) -> Result<Self::Image, FrameError>;

    /// Return a scratch image to the backend.
    fn release(&mut self, image: Self::Image);

    /// Submit `pass` reading `source` and writing `target`.
    ///
    /// Fails with [`FrameError::KernelUnavailable`] when the backend has
    /// no program for `pass`.
    fn convert(
        &mut self,
        source: &Self::Image,
        target: &mut Self::Image,
        pass: KernelPass,
    ) -> Result<(), FrameError>;

    /// Start a non-blocking readback of `image`.
    fn begin_transfer(&mut self, image: &Self::Image) -> Self::Transfer;
}
