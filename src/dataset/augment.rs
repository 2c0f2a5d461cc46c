//! Image augmentation on channel-major `f32` pixels.

use rand::Rng;

use crate::config::AugmentationConfig;

const CROP_ATTEMPTS: usize = 10;

/// Channel-major image buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl Image {
    /// Scales `u8` pixels into `[0, 1]`.
    pub fn from_bytes(channels: usize, height: usize, width: usize, pixels: &[u8]) -> Self {
        debug_assert_eq!(pixels.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            data: pixels.iter().map(|&p| p as f32 / 255.0).collect(),
        }
    }

    fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    pub fn flip_horizontal(&mut self) {
        let width = self.width;
        for row in self.data.chunks_exact_mut(width) {
            row.reverse();
        }
    }

    pub fn crop(&self, top: usize, left: usize, height: usize, width: usize) -> Self {
        debug_assert!(top + height <= self.height && left + width <= self.width);
        let mut data = Vec::with_capacity(self.channels * height * width);
        for c in 0..self.channels {
            for y in top..top + height {
                let start = (c * self.height + y) * self.width + left;
                data.extend_from_slice(&self.data[start..start + width]);
            }
        }
        Self {
            channels: self.channels,
            height,
            width,
            data,
        }
    }

    /// Bilinear resize with half-pixel centers.
    pub fn resize(&self, height: usize, width: usize) -> Self {
        if height == self.height && width == self.width {
            return self.clone();
        }

        let ys = sample_positions(self.height, height);
        let xs = sample_positions(self.width, width);
        let mut data = Vec::with_capacity(self.channels * height * width);
        for c in 0..self.channels {
            for &(y0, y1, wy) in &ys {
                for &(x0, x1, wx) in &xs {
                    let top = self.at(c, y0, x0) * (1.0 - wx) + self.at(c, y0, x1) * wx;
                    let bottom = self.at(c, y1, x0) * (1.0 - wx) + self.at(c, y1, x1) * wx;
                    data.push(top * (1.0 - wy) + bottom * wy);
                }
            }
        }
        Self {
            channels: self.channels,
            height,
            width,
            data,
        }
    }

    pub fn normalize(&mut self, mean: &[f32], std: &[f32]) {
        let plane = self.height * self.width;
        for (c, values) in self.data.chunks_exact_mut(plane).enumerate() {
            let (m, s) = (mean[c % mean.len()], std[c % std.len()]);
            for value in values {
                *value = (*value - m) / s;
            }
        }
    }
}

fn sample_positions(input: usize, output: usize) -> Vec<(usize, usize, f32)> {
    let scale = input as f32 / output as f32;
    (0..output)
        .map(|dst| {
            let src = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
            let lo = (src.floor() as usize).min(input - 1);
            let hi = (lo + 1).min(input - 1);
            (lo, hi, src - lo as f32)
        })
        .collect()
}

/// Training-time augmentation: horizontal flip followed by a random resized crop.
#[derive(Clone, Debug, PartialEq)]
pub struct Augmentation {
    pub horizontal_flip: bool,
    pub crop_scale: [f32; 2],
    pub crop_ratio: [f32; 2],
}

impl Augmentation {
    pub fn from_config(config: &AugmentationConfig) -> Self {
        Self {
            horizontal_flip: config.horizontal_flip,
            crop_scale: config.crop_scale,
            crop_ratio: config.crop_ratio,
        }
    }

    pub fn apply<R: Rng + ?Sized>(&self, mut image: Image, rng: &mut R) -> Image {
        if self.horizontal_flip && rng.gen_bool(0.5) {
            image.flip_horizontal();
        }
        let (top, left, height, width) = self.crop_window(image.height, image.width, rng);
        image
            .crop(top, left, height, width)
            .resize(image.height, image.width)
    }

    /// Picks `(top, left, height, width)` covering a random area fraction and aspect ratio.
    pub fn crop_window<R: Rng + ?Sized>(
        &self,
        height: usize,
        width: usize,
        rng: &mut R,
    ) -> (usize, usize, usize, usize) {
        let area = (height * width) as f32;
        let [scale_lo, scale_hi] = ordered(self.crop_scale);
        let [ratio_lo, ratio_hi] = ordered(self.crop_ratio);
        let (log_lo, log_hi) = (ratio_lo.ln(), ratio_hi.ln());

        for _ in 0..CROP_ATTEMPTS {
            let target_area = area * uniform(rng, scale_lo, scale_hi);
            let aspect = uniform(rng, log_lo, log_hi).exp();
            let w = (target_area * aspect).sqrt().round() as usize;
            let h = (target_area / aspect).sqrt().round() as usize;
            if w > 0 && h > 0 && w <= width && h <= height {
                let top = rng.gen_range(0..=height - h);
                let left = rng.gen_range(0..=width - w);
                return (top, left, h, w);
            }
        }

        // Fall back to a centered crop with the ratio clamped into range.
        let in_ratio = width as f32 / height as f32;
        let (h, w) = if in_ratio < ratio_lo {
            let w = width;
            (((w as f32 / ratio_lo).round() as usize).clamp(1, height), w)
        } else if in_ratio > ratio_hi {
            let h = height;
            (h, ((h as f32 * ratio_hi).round() as usize).clamp(1, width))
        } else {
            (height, width)
        };
        ((height - h) / 2, (width - w) / 2, h, w)
    }
}

fn ordered([a, b]: [f32; 2]) -> [f32; 2] {
    if a <= b { [a, b] } else { [b, a] }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f32, hi: f32) -> f32 {
    if hi > lo { rng.gen_range(lo..hi) } else { lo }
}
