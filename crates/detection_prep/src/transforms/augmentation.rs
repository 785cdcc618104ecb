//! Seeded augmentation: N reproducible randomized variants of one frame.
//!
//! The reproducibility contract: the seed for a variant depends only on
//! `(image_identity, variant_index)`, and one `StdRng` is constructed from
//! it before any sampling. The same pair therefore always yields the same
//! operation choices and the same boxes, independent of execution order or
//! concurrency. No process-global random state is touched.

use crate::geometry::{BBox, Canvas};
use crate::transforms::frame::Frame;
use crate::transforms::geometric::{reflect_pad, BorderMode, PadToCanvas};
use crate::transforms::photometric::BrightnessContrastJitter;
use crate::transforms::Transform;
use anyhow::{ensure, Result};
use image::{imageops::FilterType, DynamicImage, Rgb};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Parameters of the augmentation pipeline. Every operation fires with an
/// independent probability; ranges follow the source training recipe
/// (flips and ±30° rotation at p=0.5, ±10% brightness/contrast, crops
/// covering 90-100% of the area at aspect 0.75-1.33).
#[derive(Debug, Clone)]
pub struct AugmenterConfig {
    pub canvas: Canvas,
    pub p_flip_h: f64,
    pub p_flip_v: f64,
    pub p_jitter: f64,
    pub p_rotate: f64,
    pub p_crop: f64,
    pub max_rotation_deg: f64,
    pub crop_area: (f64, f64),
    pub crop_aspect: (f64, f64),
    pub jitter: BrightnessContrastJitter,
    pub filter: FilterType,
}

impl AugmenterConfig {
    pub fn new(canvas: Canvas) -> Self {
        Self {
            canvas,
            p_flip_h: 0.5,
            p_flip_v: 0.5,
            p_jitter: 0.5,
            p_rotate: 0.5,
            p_crop: 0.5,
            max_rotation_deg: 30.0,
            crop_area: (0.90, 1.0),
            crop_aspect: (0.75, 4.0 / 3.0),
            jitter: BrightnessContrastJitter::default(),
            filter: FilterType::Triangle,
        }
    }

    pub fn p_flip_h(mut self, p: f64) -> Self {
        self.p_flip_h = p;
        self
    }

    pub fn p_flip_v(mut self, p: f64) -> Self {
        self.p_flip_v = p;
        self
    }

    pub fn p_jitter(mut self, p: f64) -> Self {
        self.p_jitter = p;
        self
    }

    pub fn p_rotate(mut self, p: f64) -> Self {
        self.p_rotate = p;
        self
    }

    pub fn p_crop(mut self, p: f64) -> Self {
        self.p_crop = p;
        self
    }

    pub fn max_rotation_deg(mut self, deg: f64) -> Self {
        self.max_rotation_deg = deg;
        self
    }

    fn validate(&self) -> Result<()> {
        for p in [
            self.p_flip_h,
            self.p_flip_v,
            self.p_jitter,
            self.p_rotate,
            self.p_crop,
        ] {
            ensure!(
                (0.0..=1.0).contains(&p),
                "Probability must be in [0.0, 1.0] range (got {})",
                p
            );
        }
        ensure!(
            self.crop_area.0 > 0.0 && self.crop_area.0 <= self.crop_area.1,
            "Crop area range must be ordered and positive"
        );
        Ok(())
    }
}

/// Derives the 32-bit variant seed from the image identity and the variant
/// index. Stable across runs and platforms within one build.
pub fn derive_seed(identity: &str, variant: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    identity.hash(&mut hasher);
    variant.hash(&mut hasher);
    hasher.finish() & 0xffff_ffff
}

/// Applies a seeded sequence of randomized geometric and photometric
/// operations to one frame, producing reproducible variants.
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmenterConfig,
}

impl Augmenter {
    pub fn new(config: AugmenterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Lazily yields `n_variants` augmented copies of `frame`. The frame is
    /// expected to be canvas-sized already (the output of `CanvasFit`).
    pub fn augment<'a>(
        &'a self,
        frame: &'a Frame,
        identity: &'a str,
        n_variants: usize,
    ) -> AugmentIter<'a> {
        AugmentIter {
            augmenter: self,
            base: frame,
            identity,
            n_variants,
            next_index: 0,
        }
    }

    /// Builds one variant from an explicit seed. Exposed so callers that
    /// persist or replay seeds get byte-identical results.
    pub fn variant(&self, mut frame: Frame, seed: u64) -> Result<Frame> {
        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(seed);

        // Sampling order is fixed; parameters are drawn only when the gate
        // fires, which keeps the draw sequence deterministic per seed.
        if rng.random_bool(cfg.p_flip_h) {
            let w = f64::from(frame.dimensions().0);
            frame.image = frame.image.fliph();
            frame.map_boxes(|b| Some(b.hflip(w)));
        }

        if rng.random_bool(cfg.p_flip_v) {
            let h = f64::from(frame.dimensions().1);
            frame.image = frame.image.flipv();
            frame.map_boxes(|b| Some(b.vflip(h)));
        }

        if rng.random_bool(cfg.p_jitter) {
            let (alpha, beta) = cfg.jitter.sample(&mut rng);
            frame.image = cfg.jitter.apply_with(frame.image, alpha, beta);
        }

        if rng.random_bool(cfg.p_rotate) {
            let angle = rng.random_range(-cfg.max_rotation_deg..=cfg.max_rotation_deg);
            frame = self.rotate(frame, angle.to_radians());
        }

        if rng.random_bool(cfg.p_crop) {
            frame = self.random_resized_crop(frame, &mut rng)?;
        }

        // A prior step may have produced a smaller image; reflect-pad back
        // to canvas size.
        let (w, h) = frame.dimensions();
        if w < cfg.canvas.width || h < cfg.canvas.height {
            frame = PadToCanvas::new(cfg.canvas, BorderMode::Reflect).apply(frame)?;
        }
        frame.clamp_boxes();
        Ok(frame)
    }

    /// Rotation is the only geometrically lossy step: each output box is
    /// the axis-aligned hull of the four rotated corners of the input box,
    /// never the rotated rectangle itself.
    fn rotate(&self, mut frame: Frame, theta: f64) -> Frame {
        let (w, h) = frame.dimensions();
        let (cx, cy) = (f64::from(w) / 2.0, f64::from(h) / 2.0);

        // Rotate over a reflect-padded copy and crop the center back, so
        // the revealed corners show mirrored image content instead of a
        // constant fill. The pad must cover the half-diagonal: every pixel
        // of the cropped view then samples from inside the padded image.
        let diagonal = f64::from(w).hypot(f64::from(h));
        let pad = ((diagonal - f64::from(w.min(h))) / 2.0).ceil() as u32 + 1;
        let padded = reflect_pad(&frame.image.to_rgb8(), pad, pad, w + 2 * pad, h + 2 * pad);
        let rotated = rotate_about_center(
            &padded,
            theta as f32,
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
        );
        frame.image = DynamicImage::ImageRgb8(rotated).crop_imm(pad, pad, w, h);
        frame.map_boxes(|b| Some(b.rotate_bound(cx, cy, theta)));
        frame.clamp_boxes();
        frame
    }

    /// Samples a crop window covering `crop_area` of the image at an aspect
    /// ratio in `crop_aspect`, then resizes the window to the canvas. Boxes
    /// with zero overlap against the window are dropped.
    fn random_resized_crop(&self, mut frame: Frame, rng: &mut StdRng) -> Result<Frame> {
        let cfg = &self.config;
        let (w, h) = frame.dimensions();
        let (w_f, h_f) = (f64::from(w), f64::from(h));

        let frac = rng.random_range(cfg.crop_area.0..=cfg.crop_area.1);
        let aspect = rng.random_range(cfg.crop_aspect.0..=cfg.crop_aspect.1);
        let target_area = frac * w_f * h_f;
        let crop_w = ((target_area * aspect).sqrt().round()).clamp(1.0, w_f) as u32;
        let crop_h = ((target_area / aspect).sqrt().round()).clamp(1.0, h_f) as u32;
        let x0 = rng.random_range(0..=w - crop_w);
        let y0 = rng.random_range(0..=h - crop_h);

        let window = BBox {
            xtl: f64::from(x0),
            ytl: f64::from(y0),
            xbr: f64::from(x0 + crop_w),
            ybr: f64::from(y0 + crop_h),
        };
        let fx = f64::from(cfg.canvas.width) / f64::from(crop_w);
        let fy = f64::from(cfg.canvas.height) / f64::from(crop_h);

        frame.image = frame
            .image
            .crop_imm(x0, y0, crop_w, crop_h)
            .resize_exact(cfg.canvas.width, cfg.canvas.height, cfg.filter);
        frame.map_boxes(|b| {
            b.intersection(&window)
                .map(|clipped| clipped.translate(-window.xtl, -window.ytl).scale(fx, fy))
        });
        Ok(frame)
    }
}

/// Lazy, finite iterator over the variants of one frame.
pub struct AugmentIter<'a> {
    augmenter: &'a Augmenter,
    base: &'a Frame,
    identity: &'a str,
    n_variants: usize,
    next_index: usize,
}

impl Iterator for AugmentIter<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.n_variants {
            return None;
        }
        let seed = derive_seed(self.identity, self.next_index);
        self.next_index += 1;
        Some(self.augmenter.variant(self.base.clone(), seed))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.n_variants - self.next_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for AugmentIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::model::ObjectAnnotation;
    use image::{Rgb, RgbImage};

    fn test_frame() -> Frame {
        let mut img = RgbImage::new(128, 128);
        for y in 0..128 {
            for x in 0..128 {
                img.put_pixel(x, y, Rgb([x as u8 * 2, y as u8 * 2, 90]));
            }
        }
        Frame::new(
            DynamicImage::ImageRgb8(img),
            vec![
                ObjectAnnotation::new("banana", BBox::new(20.0, 30.0, 70.0, 80.0).unwrap()),
                ObjectAnnotation::new("apple", BBox::new(90.0, 10.0, 120.0, 50.0).unwrap()),
            ],
        )
    }

    fn augmenter() -> Augmenter {
        Augmenter::new(AugmenterConfig::new(Canvas::square(128).unwrap())).unwrap()
    }

    #[test]
    fn test_seed_depends_on_identity_and_index() {
        assert_eq!(derive_seed("frame_3.png", 0), derive_seed("frame_3.png", 0));
        assert_ne!(derive_seed("frame_3.png", 0), derive_seed("frame_3.png", 1));
        assert_ne!(derive_seed("frame_3.png", 0), derive_seed("frame_4.png", 0));
        assert!(derive_seed("frame_3.png", 7) <= u64::from(u32::MAX));
    }

    #[test]
    fn test_identical_identity_and_index_reproduce_exactly() -> Result<()> {
        let frame = test_frame();
        let aug = augmenter();

        for index in 0..4 {
            let a = aug.variant(frame.clone(), derive_seed("frame_3.png", index))?;
            let b = aug.variant(frame.clone(), derive_seed("frame_3.png", index))?;
            assert_eq!(a.objects, b.objects, "boxes differ for variant {index}");
            assert_eq!(
                a.image.as_bytes(),
                b.image.as_bytes(),
                "pixels differ for variant {index}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_iterator_is_lazy_finite_and_sized() {
        let frame = test_frame();
        let aug = augmenter();
        let iter = aug.augment(&frame, "frame_3.png", 3);
        assert_eq!(iter.len(), 3);
        let variants: Vec<_> = iter.collect();
        assert_eq!(variants.len(), 3);
        assert!(variants.iter().all(|v| v.is_ok()));
    }

    #[test]
    fn test_forced_horizontal_flip_maps_boxes_exactly() -> Result<()> {
        let frame = test_frame();
        let aug = Augmenter::new(
            AugmenterConfig::new(Canvas::square(128)?)
                .p_flip_h(1.0)
                .p_flip_v(0.0)
                .p_jitter(0.0)
                .p_rotate(0.0)
                .p_crop(0.0),
        )?;
        let out = aug.variant(frame, 42)?;
        let b = out.objects[0].bbox;
        assert_eq!(b, BBox::new(128.0 - 70.0, 30.0, 128.0 - 20.0, 80.0)?);
        Ok(())
    }

    #[test]
    fn test_all_output_boxes_respect_canvas_bounds() -> Result<()> {
        let frame = test_frame();
        let aug = augmenter();
        for variant in aug.augment(&frame, "frame_3.png", 16) {
            let variant = variant?;
            assert_eq!(variant.dimensions(), (128, 128));
            for object in &variant.objects {
                let b = object.bbox;
                assert!(b.xtl >= 0.0 && b.xbr <= 128.0 && b.xtl < b.xbr);
                assert!(b.ytl >= 0.0 && b.ybr <= 128.0 && b.ytl < b.ybr);
            }
        }
        Ok(())
    }

    #[test]
    fn test_rotation_border_mirrors_image_content() -> Result<()> {
        // On a uniform image a reflected border is indistinguishable from
        // the interior, so every output pixel must keep the uniform value.
        // A constant fill would leave darker corners.
        let img = RgbImage::from_pixel(128, 128, Rgb([90, 90, 90]));
        let frame = Frame::new(
            DynamicImage::ImageRgb8(img),
            vec![ObjectAnnotation::new(
                "banana",
                BBox::new(30.0, 30.0, 90.0, 90.0)?,
            )],
        );
        let aug = Augmenter::new(
            AugmenterConfig::new(Canvas::square(128)?)
                .p_flip_h(0.0)
                .p_flip_v(0.0)
                .p_jitter(0.0)
                .p_rotate(1.0)
                .p_crop(0.0),
        )?;
        for seed in [11, 42, 99] {
            let out = aug.variant(frame.clone(), seed)?;
            for pixel in out.image.to_rgb8().pixels() {
                for channel in pixel.0 {
                    assert!((i16::from(channel) - 90).abs() <= 1);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_variant_never_fails_when_all_boxes_drop() -> Result<()> {
        // A box that only overlaps a sliver of the image can be clipped
        // away by aggressive crops; the variant itself must still succeed.
        let mut frame = test_frame();
        frame.objects = vec![ObjectAnnotation::new(
            "banana",
            BBox::new(127.0, 127.0, 128.0, 128.0)?,
        )];
        let aug = augmenter();
        for variant in aug.augment(&frame, "frame_3.png", 8) {
            let variant = variant?;
            assert_eq!(variant.objects.len() + variant.dropped, 1);
        }
        Ok(())
    }
}
