//! Wire pixel formats and the sizing rules that go with them.
//!
//! The converted (scratch) image is always a 4-byte-per-texel surface.
//! Packed 4:2:2 formats store two source pixels per texel, so the
//! scratch width is half the source width; UYVA appends the alpha plane
//! as extra rows below the luma/chroma region.

use serde::{Deserialize, Serialize};

/// Bytes per texel of every converted scratch image.
pub const SCRATCH_BYTES_PER_TEXEL: usize = 4;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout handed to the network sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed U Y V Y (4:2:2) followed by a full-resolution 8-bit alpha plane.
    #[default]
    Uyva,
    /// Packed U Y V Y (4:2:2), no alpha.
    Uyvy,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba,
    /// 4 bytes per pixel: Red, Green, Blue, padding.
    Rgbx,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra,
    /// 4 bytes per pixel: Blue, Green, Red, padding.
    Bgrx,
}

impl PixelFormat {
    /// Every supported format.
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::Uyva,
        PixelFormat::Uyvy,
        PixelFormat::Rgba,
        PixelFormat::Rgbx,
        PixelFormat::Bgra,
        PixelFormat::Bgrx,
    ];

    /// Four-character code, packed little-endian (`'U' | 'Y' << 8 | …`).
    pub const fn fourcc(self) -> u32 {
        let b = match self {
            PixelFormat::Uyva => *b"UYVA",
            PixelFormat::Uyvy => *b"UYVY",
            PixelFormat::Rgba => *b"RGBA",
            PixelFormat::Rgbx => *b"RGBX",
            PixelFormat::Bgra => *b"BGRA",
            PixelFormat::Bgrx => *b"BGRX",
        };
        u32::from_le_bytes(b)
    }

    /// Inverse of [`fourcc`](Self::fourcc).
    pub fn from_fourcc(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.fourcc() == code)
    }

    /// `true` for the packed luma/chroma formats.
    pub const fn is_packed_yuv(self) -> bool {
        matches!(self, PixelFormat::Uyva | PixelFormat::Uyvy)
    }

    /// `true` when alpha is encoded as a stacked extra region.
    pub const fn has_alpha_plane(self) -> bool {
        matches!(self, PixelFormat::Uyva)
    }

    /// Divisor applied to the source width.
    pub const fn width_divisor(self) -> u32 {
        if self.is_packed_yuv() { 2 } else { 1 }
    }

    /// Scratch image dimensions for a `width` x `height` source.
    ///
    /// Odd widths and heights truncate.
    pub const fn output_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            PixelFormat::Uyva => (width / 2, height * 3 / 2),
            PixelFormat::Uyvy => (width / 2, height),
            _ => (width, height),
        }
    }

    /// Line stride in bytes of the luma/chroma (or native) region, computed
    /// from the *source* width.
    pub const fn line_stride(self, width: u32) -> u32 {
        if self.is_packed_yuv() { width * 2 } else { width * 4 }
    }

    /// Byte length of the converted buffer for a `width` x `height` source.
    pub const fn buffer_len(self, width: u32, height: u32) -> usize {
        let (w, h) = self.output_size(width, height);
        w as usize * h as usize * SCRATCH_BYTES_PER_TEXEL
    }

    /// The conversion pass that produces this format.
    pub const fn kernel_pass(self, invert_y: bool) -> KernelPass {
        match self {
            PixelFormat::Uyvy => KernelPass::PackUyvy,
            PixelFormat::Uyva => KernelPass::PackUyva,
            _ if invert_y => KernelPass::FlipY,
            _ => KernelPass::Copy,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.fourcc().to_le_bytes();
        for c in code {
            write!(f, "{}", c as char)?;
        }
        Ok(())
    }
}

// ── KernelPass ───────────────────────────────────────────────────

/// Conversion pass the backend has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelPass {
    /// RGBA → packed UYVY.
    PackUyvy,
    /// RGBA → packed UYVY with stacked alpha plane.
    PackUyva,
    /// Native copy with vertical flip.
    FlipY,
    /// Plain copy.
    Copy,
}

impl std::fmt::Display for KernelPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PackUyvy => write!(f, "UYVY pack pass"),
            Self::PackUyva => write!(f, "UYVA pack pass"),
            Self::FlipY => write!(f, "flip-y pass"),
            Self::Copy => write!(f, "copy pass"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
