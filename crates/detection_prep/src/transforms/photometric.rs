//! Color and appearance adjustments. Photometric only: box coordinates
//! never change here.

use anyhow::{ensure, Result};
use image::{DynamicImage, RgbImage};
use rand::rngs::StdRng;
use rand::Rng;

/// Randomized brightness/contrast jitter with symmetric limits, applied as
/// `v' = alpha * v + beta * 255` per channel.
#[derive(Debug, Clone)]
pub struct BrightnessContrastJitter {
    brightness_limit: f64,
    contrast_limit: f64,
}

impl BrightnessContrastJitter {
    pub fn new(brightness_limit: f64, contrast_limit: f64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&brightness_limit) && (0.0..=1.0).contains(&contrast_limit),
            "Jitter limits must be in [0.0, 1.0] (got brightness {}, contrast {})",
            brightness_limit,
            contrast_limit
        );
        Ok(Self {
            brightness_limit,
            contrast_limit,
        })
    }

    /// Draws `(alpha, beta)` from the caller's RNG. Sampling is separated
    /// from application so the augmentation engine controls the draw order.
    pub fn sample(&self, rng: &mut StdRng) -> (f64, f64) {
        let alpha = 1.0 + rng.random_range(-self.contrast_limit..=self.contrast_limit);
        let beta = rng.random_range(-self.brightness_limit..=self.brightness_limit);
        (alpha, beta)
    }

    /// Applies previously sampled parameters.
    pub fn apply_with(&self, img: DynamicImage, alpha: f64, beta: f64) -> DynamicImage {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let adjusted: Vec<u8> = rgb
            .into_raw()
            .into_iter()
            .map(|v| (alpha * f64::from(v) + beta * 255.0).clamp(0.0, 255.0) as u8)
            .collect();
        // Buffer length is unchanged, so reconstruction cannot fail.
        DynamicImage::ImageRgb8(
            RgbImage::from_raw(width, height, adjusted).expect("jitter preserves buffer size"),
        )
    }
}

impl Default for BrightnessContrastJitter {
    /// The limits used for detection-chip augmentation (±10%).
    fn default() -> Self {
        Self {
            brightness_limit: 0.1,
            contrast_limit: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;

    #[test]
    fn test_identity_parameters_leave_pixels_unchanged() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([10, 100, 200]));
        img.put_pixel(1, 0, Rgb([0, 128, 255]));
        let original = DynamicImage::ImageRgb8(img);

        let jitter = BrightnessContrastJitter::default();
        let out = jitter.apply_with(original.clone(), 1.0, 0.0);
        assert_eq!(original.as_bytes(), out.as_bytes());
    }

    #[test]
    fn test_brightness_shift_saturates() {
        let mut img = RgbImage::new(1, 1);
        img.put_pixel(0, 0, Rgb([250, 5, 128]));
        let jitter = BrightnessContrastJitter::default();

        let brighter = jitter.apply_with(DynamicImage::ImageRgb8(img.clone()), 1.0, 0.1);
        assert_eq!(brighter.as_bytes(), &[255, 30, 153]);

        let darker = jitter.apply_with(DynamicImage::ImageRgb8(img), 1.0, -0.1);
        assert_eq!(darker.as_bytes(), &[224, 0, 102]);
    }

    #[test]
    fn test_sampled_parameters_stay_within_limits() -> Result<()> {
        let jitter = BrightnessContrastJitter::new(0.1, 0.1)?;
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let (alpha, beta) = jitter.sample(&mut rng);
            assert!((0.9..=1.1).contains(&alpha));
            assert!((-0.1..=0.1).contains(&beta));
        }
        Ok(())
    }

    #[test]
    fn test_rejects_out_of_range_limits() {
        assert!(BrightnessContrastJitter::new(1.5, 0.1).is_err());
    }
}
