//! Grayscale frame type and the image statistics the quality gate needs.

/// Pixel values below this count as "dark" for the histogram check.
const DARK_PIXEL_CEILING: u8 = 32;

/// A captured grayscale frame handed in by the capture loop.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap a luma buffer, checking that it covers `width * height` pixels.
    pub fn from_luma(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Fraction of pixels in the darkest histogram bucket (0–31).
    pub fn dark_fraction(&self) -> f32 {
        if self.data.is_empty() {
            return 1.0;
        }
        let dark = self.data.iter().filter(|&&p| p < DARK_PIXEL_CEILING).count();
        dark as f32 / self.data.len() as f32
    }

    /// True if the frame has at least one interior pixel for a 3×3 kernel.
    pub fn has_interior(&self) -> bool {
        self.width >= 3
            && self.height >= 3
            && self.data.len() >= self.width as usize * self.height as usize
    }

    /// Variance of the 4-neighbour Laplacian response over interior pixels.
    ///
    /// Kernel:
    /// ```text
    /// | 0  1  0 |
    /// | 1 -4  1 |
    /// | 0  1  0 |
    /// ```
    /// Returns 0.0 for frames with no interior.
    pub fn laplacian_variance(&self) -> f64 {
        if !self.has_interior() {
            return 0.0;
        }
        let w = self.width as usize;
        let h = self.height as usize;
        let px = |x: usize, y: usize| self.data[y * w + x] as f64;

        // Single pass: accumulate sum and sum of squares.
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let response = px(x, y - 1) + px(x - 1, y) + px(x + 1, y) + px(x, y + 1)
                    - 4.0 * px(x, y);
                sum += response;
                sum_sq += response * response;
            }
        }

        let n = ((w - 2) * (h - 2)) as f64;
        let mean = sum / n;
        (sum_sq / n - mean * mean).max(0.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid luma length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
