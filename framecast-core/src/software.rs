//! CPU reference implementation of the GPU collaborator.
//!
//! [`SoftwareDevice`] runs the conversion passes on the host and
//! completes readbacks on the tokio runtime after a configurable
//! latency, so the pipeline sees the same asynchronous behaviour it
//! would against a real device.
//!
//! Packed passes use BT.709 limited-range coefficients. The UYVA alpha
//! plane is written linearly (one byte per source pixel) below the
//! luma/chroma rows.

use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::device::{ConversionBackend, Surface, Transfer, TransferStatus};
use crate::error::FrameError;
use crate::format::{KernelPass, SCRATCH_BYTES_PER_TEXEL};

// ── RgbaImage ────────────────────────────────────────────────────

/// Tightly packed 4-byte-per-texel image.
///
/// Sources hold straight RGBA8; scratch images hold whatever layout the
/// last pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbaImage {
    /// A zeroed image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * SCRATCH_BYTES_PER_TEXEL],
        }
    }

    /// Wrap existing texels. `data` must hold exactly `width * height * 4` bytes.
    pub fn from_texels(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        if data.len() != width as usize * height as usize * SCRATCH_BYTES_PER_TEXEL {
            return Err(FrameError::InvalidSource { width, height });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn texels(&self) -> &[u8] {
        &self.data
    }

    pub fn texels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Texel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let o = self.offset(x, y);
        [self.data[o], self.data[o + 1], self.data[o + 2], self.data[o + 3]]
    }

    /// Overwrite the texel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn set_texel(&mut self, x: u32, y: u32, value: [u8; 4]) {
        let o = self.offset(x, y);
        self.data[o..o + 4].copy_from_slice(&value);
    }

    fn row_len(&self) -> usize {
        self.width as usize * SCRATCH_BYTES_PER_TEXEL
    }

    fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.row_len();
        &self.data[start..start + self.row_len()]
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * SCRATCH_BYTES_PER_TEXEL
    }
}

impl Surface for RgbaImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

// ── Colour helpers ───────────────────────────────────────────────

/// BT.709 limited-range Y'CbCr of a straight RGB8 pixel.
fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let cb = (b - y) / 1.8556;
    let cr = (r - y) / 1.5748;
    (16.0 + 219.0 * y, 128.0 + 224.0 * cb, 128.0 + 224.0 * cr)
}

fn quantize(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

// ── Passes ───────────────────────────────────────────────────────

fn pack_uyvy(src: &RgbaImage, dst: &mut RgbaImage, with_alpha: bool) {
    let pairs = dst.width;
    for y in 0..src.height.min(dst.height) {
        for tx in 0..pairs {
            let p0 = src.texel(tx * 2, y);
            let p1 = src.texel(tx * 2 + 1, y);
            let (y0, u0, v0) = rgb_to_ycbcr(p0[0], p0[1], p0[2]);
            let (y1, u1, v1) = rgb_to_ycbcr(p1[0], p1[1], p1[2]);
            dst.set_texel(
                tx,
                y,
                [
                    quantize((u0 + u1) * 0.5),
                    quantize(y0),
                    quantize((v0 + v1) * 0.5),
                    quantize(y1),
                ],
            );
        }
    }

    if !with_alpha {
        return;
    }

    let used = pairs as usize * 2;
    let plane_start = src.height as usize * dst.row_len();
    let len = dst.data.len();
    let plane = &mut dst.data[plane_start.min(len)..];
    let alphas = (0..src.height).flat_map(|y| src.row(y).chunks_exact(4).take(used).map(|p| p[3]));
    for (slot, a) in plane.iter_mut().zip(alphas) {
        *slot = a;
    }
}

fn copy_rows(src: &RgbaImage, dst: &mut RgbaImage, flip: bool) {
    let h = src.height.min(dst.height);
    let len = src.row_len().min(dst.row_len());
    for y in 0..h {
        let from = if flip { src.height - 1 - y } else { y };
        let start = y as usize * dst.row_len();
        dst.data[start..start + len].copy_from_slice(&src.row(from)[..len]);
    }
}

// ── SoftwareTransfer ─────────────────────────────────────────────

type Outcome = Result<Bytes, String>;

/// Readback completed by a runtime task.
pub struct SoftwareTransfer {
    rx: Option<oneshot::Receiver<Outcome>>,
    outcome: Option<Outcome>,
    runtime: Handle,
}

impl SoftwareTransfer {
    fn settle(&mut self, outcome: Outcome) -> TransferStatus {
        self.rx = None;
        let status = if outcome.is_ok() {
            TransferStatus::Done
        } else {
            TransferStatus::Failed
        };
        self.outcome = Some(outcome);
        status
    }

    fn resolved(&self) -> Option<TransferStatus> {
        self.outcome.as_ref().map(|o| match o {
            Ok(_) => TransferStatus::Done,
            Err(_) => TransferStatus::Failed,
        })
    }
}

impl Transfer for SoftwareTransfer {
    fn status(&mut self) -> TransferStatus {
        if let Some(s) = self.resolved() {
            return s;
        }
        let Some(rx) = self.rx.as_mut() else {
            return self.settle(Err("transfer receiver missing".into()));
        };
        match rx.try_recv() {
            Ok(outcome) => self.settle(outcome),
            Err(oneshot::error::TryRecvError::Empty) => TransferStatus::Pending,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.settle(Err("transfer task dropped".into()))
            }
        }
    }

    /// Must not be called from inside an async context.
    fn wait(&mut self, timeout: Duration) -> TransferStatus {
        if let Some(s) = self.resolved() {
            return s;
        }
        let Some(rx) = self.rx.as_mut() else {
            return self.settle(Err("transfer receiver missing".into()));
        };
        let result = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, rx).await });
        match result {
            Ok(Ok(outcome)) => self.settle(outcome),
            Ok(Err(_)) => self.settle(Err("transfer task dropped".into())),
            Err(_elapsed) => TransferStatus::Pending,
        }
    }

    fn read_bytes(&mut self) -> Result<Bytes, FrameError> {
        match self.status() {
            TransferStatus::Pending => Err(FrameError::Timeout(Duration::ZERO)),
            _ => match &self.outcome {
                Some(Ok(bytes)) => Ok(bytes.clone()),
                Some(Err(msg)) => Err(FrameError::Transfer(msg.clone())),
                None => Err(FrameError::Transfer("transfer never resolved".into())),
            },
        }
    }
}

// ── SoftwareDevice ───────────────────────────────────────────────

/// Host-memory conversion backend.
pub struct SoftwareDevice {
    runtime: Handle,
    latency: Duration,
    /// Every n-th transfer fails (0 = never).
    fault_interval: u64,
    transfers_started: u64,
}

impl SoftwareDevice {
    /// A device completing transfers on `runtime` with no extra latency.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            latency: Duration::ZERO,
            fault_interval: 0,
            transfers_started: 0,
        }
    }

    /// Delay each transfer's completion by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every `n`-th transfer fail (0 disables fault injection).
    pub fn with_fault_interval(mut self, n: u64) -> Self {
        self.fault_interval = n;
        self
    }

    /// Transfers started so far.
    pub fn transfers_started(&self) -> u64 {
        self.transfers_started
    }
}

impl ConversionBackend for SoftwareDevice {
    type Image = RgbaImage;
    type Transfer = SoftwareTransfer;

    fn allocate(&mut self, width: u32, height: u32) -> Result<RgbaImage, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Allocation { width, height });
        }
        Ok(RgbaImage::new(width, height))
    }

    fn release(&mut self, _image: RgbaImage) {}

    fn convert(
        &mut self,
        source: &RgbaImage,
        target: &mut RgbaImage,
        pass: KernelPass,
    ) -> Result<(), FrameError> {
        match pass {
            KernelPass::PackUyvy => pack_uyvy(source, target, false),
            KernelPass::PackUyva => pack_uyvy(source, target, true),
            KernelPass::FlipY => copy_rows(source, target, true),
            KernelPass::Copy => copy_rows(source, target, false),
        }
        Ok(())
    }

    fn begin_transfer(&mut self, image: &RgbaImage) -> SoftwareTransfer {
        self.transfers_started += 1;
        let fail = self.fault_interval > 0 && self.transfers_started % self.fault_interval == 0;
        let data = Bytes::copy_from_slice(image.texels());
        let latency = self.latency;

        let (tx, rx) = oneshot::channel();
        self.runtime.spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let outcome = if fail {
                Err("injected readback fault".to_string())
            } else {
                Ok(data)
            };
            let _ = tx.send(outcome);
        });

        SoftwareTransfer {
            rx: Some(rx),
            outcome: None,
            runtime: self.runtime.clone(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
