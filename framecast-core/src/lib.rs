//! # framecast-core
//!
//! Asynchronous frame capture → network sender pipeline.
//!
//! Once per host tick a rendered image is reformatted into a wire pixel
//! layout, read back from the device without stalling the frame loop,
//! and handed to a named network sender.
//!
//! This crate contains:
//! - **Formats**: `PixelFormat`, FourCC codes, scratch geometry and line stride
//! - **Device seam**: `ConversionBackend`, `Surface`, `Transfer`
//! - **Converter**: `FrameConverter`, owner of the single scratch image
//! - **Readback**: `ReadbackQueue`, a bounded FIFO of in-flight transfers
//! - **Channel**: `Channel` over a `NativeSender`, with lazy create and rename
//! - **Pipeline**: `FramePipeline`, the per-tick orchestrator
//! - **Reference collaborators**: `SoftwareDevice` (CPU passes) and
//!   `UdpSender` / `FrameReceiver` (chunked UDP)
//! - **Error**: `FrameError`, `EnqueueRejected`
//!
//! The scripted fakes in `testing` are built only with the `testing`
//! feature.

pub mod channel;
pub mod convert;
pub mod device;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod readback;
pub mod software;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{Channel, NativeSender, VideoFrame};
pub use convert::{Converted, FrameConverter};
pub use device::{ConversionBackend, Surface, Transfer, TransferStatus};
pub use error::{EnqueueRejected, FrameError};
pub use format::{KernelPass, PixelFormat};
pub use pipeline::{ExecutionMode, FramePipeline, PipelineConfig, PipelineState, PipelineStats};
pub use readback::{DrainPolicy, FrameMeta, QueueStats, ReadbackQueue, ReadyFrame, TransferRequest};
pub use software::{RgbaImage, SoftwareDevice, SoftwareTransfer};
pub use transport::{FrameReceiver, ReceivedFrame, UdpHandle, UdpSender, UdpSenderConfig};
