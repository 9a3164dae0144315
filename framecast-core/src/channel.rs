//! Lazily-opened, named handle to the external protocol sender.
//!
//! A native sender's name cannot be changed in place. [`Channel::rename`]
//! therefore destroys the current instance and the next send creates a
//! new one under the new name.
//!
//! ```text
//!  closed ──ensure_open──► open ──rename / close──► closed
//!                            │
//!                            └── send / fence (open only)
//! ```

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::FrameError;
use crate::format::PixelFormat;
use crate::readback::ReadyFrame;

// ── VideoFrame ───────────────────────────────────────────────────

/// One frame as submitted to the native sender.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Converted bytes.
    pub data: Bytes,
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
    /// Wire format.
    pub format: PixelFormat,
    /// Bytes per row of the luma/chroma (or native) region.
    pub line_stride: u32,
}

impl VideoFrame {
    /// Build a frame, deriving the line stride from `format`.
    pub fn new(data: Bytes, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
            line_stride: format.line_stride(width),
        }
    }
}

impl From<ReadyFrame> for VideoFrame {
    fn from(frame: ReadyFrame) -> Self {
        let m = frame.meta;
        Self::new(frame.data, m.width, m.height, m.format)
    }
}

// ── NativeSender ─────────────────────────────────────────────────

/// The external protocol encoder/sender.
pub trait NativeSender {
    /// Opaque per-instance handle.
    type Handle;

    /// `false` when the sender subsystem is absent on this machine.
    fn is_available(&self) -> bool;

    /// Create a sender instance advertised as `name`.
    fn create(&mut self, name: &str) -> Option<Self::Handle>;

    /// Destroy an instance.
    fn destroy(&mut self, handle: Self::Handle);

    /// Submit a frame. Returns before encoding/transmission completes.
    fn send(&mut self, handle: &Self::Handle, frame: VideoFrame);

    /// Block until every frame submitted so far has been consumed.
    fn fence(&mut self, handle: &Self::Handle);
}

// ── Channel ──────────────────────────────────────────────────────

/// Owns at most one native sender instance at a time.
pub struct Channel<S: NativeSender> {
    sender: S,
    name: String,
    handle: Option<S::Handle>,
    /// Set after a failed create so the warning is not repeated every tick.
    create_failed: bool,
}

impl<S: NativeSender> Channel<S> {
    /// A closed channel named `name`.
    pub fn new(sender: S, name: impl Into<String>) -> Self {
        Self {
            sender,
            name: name.into(),
            handle: None,
            create_failed: false,
        }
    }

    /// Current name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` while a native instance exists.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Borrow the native sender.
    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// Open the channel under `name`, creating the native instance if
    /// needed. Idempotent when already open under the same name.
    pub fn ensure_open(&mut self, name: &str) -> Result<&S::Handle, FrameError> {
        if name != self.name {
            self.rename(name);
        }

        if self.handle.is_none() {
            if !self.sender.is_available() {
                return Err(FrameError::SenderUnavailable);
            }
            match self.sender.create(&self.name) {
                Some(h) => {
                    debug!(name = %self.name, "sender created");
                    self.create_failed = false;
                    self.handle = Some(h);
                }
                None => {
                    if !self.create_failed {
                        warn!("failed to create sender {:?}", self.name);
                        self.create_failed = true;
                    }
                    return Err(FrameError::SenderCreate {
                        name: self.name.clone(),
                    });
                }
            }
        }

        self.handle.as_ref().ok_or(FrameError::SenderClosed)
    }

    /// Change the channel name. An open instance is destroyed and will be
    /// recreated lazily on the next send.
    pub fn rename(&mut self, new_name: &str) {
        if new_name == self.name {
            return;
        }
        debug!(from = %self.name, to = new_name, "renaming sender");
        self.close();
        self.name = new_name.to_string();
        self.create_failed = false;
    }

    /// Forward a frame to the open instance.
    pub fn send(&mut self, frame: VideoFrame) -> Result<(), FrameError> {
        let handle = self.handle.as_ref().ok_or(FrameError::SenderClosed)?;
        self.sender.send(handle, frame);
        Ok(())
    }

    /// Wait for the instance to finish consuming submitted frames.
    /// No-op when closed.
    pub fn fence(&mut self) {
        if let Some(handle) = self.handle.as_ref() {
            self.sender.fence(handle);
        }
    }

    /// Fence and destroy the native instance. No-op when already closed.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.sender.fence(&handle);
            self.sender.destroy(handle);
            debug!(name = %self.name, "sender destroyed");
        }
    }
}

impl<S: NativeSender> Drop for Channel<S> {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ────────────────────────────────────────────────────────
