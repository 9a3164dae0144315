//! Source image → wire-layout scratch image.
//!
//! [`FrameConverter`] owns the backend and exactly one scratch image.
//! A size change releases the old scratch before the new one is
//! allocated, so at most one scratch image exists per pipeline.

use tracing::trace;

use crate::device::{ConversionBackend, Surface};
use crate::error::FrameError;
use crate::format::{KernelPass, PixelFormat};

/// Dimensions of the scratch image produced by the last conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Converted {
    /// Scratch width in texels.
    pub width: u32,
    /// Scratch height in texels.
    pub height: u32,
    /// Pass that produced it.
    pub pass: KernelPass,
}

/// Stateless-per-call adapter around a [`ConversionBackend`].
pub struct FrameConverter<B: ConversionBackend> {
    backend: B,
    scratch: Option<B::Image>,
}

impl<B: ConversionBackend> FrameConverter<B> {
    /// Wrap `backend`. No scratch image is allocated until the first call.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            scratch: None,
        }
    }

    /// Convert `source` into the scratch image for `format`.
    ///
    /// On failure the scratch image is released and `None` is held.
    pub fn convert(
        &mut self,
        source: &B::Image,
        format: PixelFormat,
        invert_y: bool,
    ) -> Result<Converted, FrameError> {
        let (sw, sh) = (source.width(), source.height());
        let (tw, th) = format.output_size(sw, sh);
        if sw == 0 || sh == 0 || tw == 0 || th == 0 {
            return Err(FrameError::InvalidSource {
                width: sw,
                height: sh,
            });
        }

        let mut target = match self.scratch.take() {
            Some(img) if img.width() == tw && img.height() == th => img,
            Some(old) => {
                self.backend.release(old);
                self.backend.allocate(tw, th)?
            }
            None => self.backend.allocate(tw, th)?,
        };

        let pass = format.kernel_pass(invert_y);
        if let Err(e) = self.backend.convert(source, &mut target, pass) {
            self.backend.release(target);
            return Err(e);
        }
        trace!(%format, tw, th, "converted {sw}x{sh} source");

        self.scratch = Some(target);
        Ok(Converted {
            width: tw,
            height: th,
            pass,
        })
    }

    /// Backend and scratch image together, for starting a transfer lazily.
    pub fn transfer_source(&mut self) -> Option<(&mut B, &B::Image)> {
        let image = self.scratch.as_ref()?;
        Some((&mut self.backend, image))
    }

    /// The scratch image, if one is held.
    pub fn scratch(&self) -> Option<&B::Image> {
        self.scratch.as_ref()
    }

    /// Return the scratch image to the backend.
    pub fn release(&mut self) {
        if let Some(img) = self.scratch.take() {
            self.backend.release(img);
        }
    }

    /// Borrow the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutably borrow the backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: ConversionBackend> Drop for FrameConverter<B> {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────
