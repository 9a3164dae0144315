//! Synthetic moving colour-bar source.

use framecast_core::RgbaImage;

/// 75% SMPTE-style bars, left to right.
const BARS: [[u8; 4]; 8] = [
    [191, 191, 191, 255], // white
    [191, 191, 0, 255],   // yellow
    [0, 191, 191, 255],   // cyan
    [0, 191, 0, 255],     // green
    [191, 0, 191, 255],   // magenta
    [191, 0, 0, 255],     // red
    [0, 0, 191, 255],     // blue
    [0, 0, 0, 255],       // black
];

/// Colour bars scrolling one pixel per frame, with an alpha ramp along
/// the bottom eighth.
#[derive(Debug, Clone)]
pub struct TestPattern {
    width: u32,
    height: u32,
    image: RgbaImage,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            image: RgbaImage::new(width, height),
        }
    }

    /// Render frame `index` and return it. The same buffer is reused.
    pub fn render(&mut self, index: u64) -> &RgbaImage {
        let w = self.width as u64;
        let shift = index % w.max(1);
        let band = self.height - self.height / 8;

        for y in 0..self.height {
            for x in 0..self.width {
                let pos = (x as u64 + shift) % w;
                let bar = (pos * BARS.len() as u64 / w) as usize;
                let mut texel = BARS[bar];
                if y >= band {
                    texel[3] = (x * 255 / self.width.max(1)) as u8;
                }
                self.image.set_texel(x, y, texel);
            }
        }
        &self.image
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::Surface;

    #[test]
    fn first_frame_starts_with_white() {
        let mut p = TestPattern::new(80, 16);
        let img = p.render(0);
        assert_eq!((img.width(), img.height()), (80, 16));
        assert_eq!(img.texel(0, 0), BARS[0]);
        assert_eq!(img.texel(79, 0), BARS[7]);
    }

    #[test]
    fn bars_scroll_with_frame_index() {
        let mut p = TestPattern::new(80, 16);
        // One bar is 10 pixels wide.
        let img = p.render(10);
        assert_eq!(img.texel(0, 0), BARS[1]);
    }

    #[test]
    fn bottom_band_carries_alpha_ramp() {
        let mut p = TestPattern::new(80, 16);
        let img = p.render(0);
        assert_eq!(img.texel(0, 15)[3], 0);
        assert!(img.texel(79, 15)[3] > 200);
        assert_eq!(img.texel(79, 0)[3], 255);
    }
}
