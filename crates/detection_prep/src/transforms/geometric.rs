//! Spatial transforms that carry boxes through every image change.
//!
//! The canonical ordering is resize → center-crop → clamp → pad: scaling
//! first guarantees one uniform factor applies to all boxes before any
//! translation, so composed steps cannot compound rounding error.
//! Coordinates stay `f64` throughout; see [`crate::annotation::voc`] for the
//! single rounding point.

use crate::annotation::model::ObjectAnnotation;
use crate::geometry::{BBox, Canvas};
use crate::transforms::frame::Frame;
use crate::transforms::Transform;
use anyhow::{ensure, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImage, Rgb, RgbImage};
use log::debug;

/// Which image axis the aspect-preserving resize locks to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedAxis {
    Width,
    Height,
}

/// How padding fills the canvas outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    Solid(Rgb<u8>),
    /// Mirror the edge rows/columns outward (edge pixel included).
    Reflect,
}

// ============================================================================
// Resize
// ============================================================================

/// Aspect-preserving resize: the locked axis is scaled exactly to `target`,
/// the other axis follows with `round(scale * src)`. Boxes scale by the
/// realized per-axis factors so they always agree with the image.
#[derive(Debug, Clone)]
pub struct Resize {
    target: u32,
    axis: LockedAxis,
    filter: FilterType,
}

impl Resize {
    pub fn new(target: u32, axis: LockedAxis, filter: FilterType) -> Result<Self> {
        ensure!(target > 0, "Resize target must be positive (got {target})");
        Ok(Self {
            target,
            axis,
            filter,
        })
    }
}

impl Transform<Frame, Frame> for Resize {
    fn apply(&self, mut frame: Frame) -> Result<Frame> {
        let (src_w, src_h) = frame.dimensions();
        let (new_w, new_h) = match self.axis {
            LockedAxis::Width => {
                let scale = f64::from(self.target) / f64::from(src_w);
                (
                    self.target,
                    (scale * f64::from(src_h)).round().max(1.0) as u32,
                )
            }
            LockedAxis::Height => {
                let scale = f64::from(self.target) / f64::from(src_h);
                (
                    (scale * f64::from(src_w)).round().max(1.0) as u32,
                    self.target,
                )
            }
        };
        let fx = f64::from(new_w) / f64::from(src_w);
        let fy = f64::from(new_h) / f64::from(src_h);
        frame.image = frame.image.resize_exact(new_w, new_h, self.filter);
        frame.map_boxes(|b| Some(b.scale(fx, fy)));
        Ok(frame)
    }
}

// ============================================================================
// CenterCrop
// ============================================================================

/// Symmetric crop down to the canvas on every axis where the image exceeds
/// it. `offset = (dim - canvas_dim) / 2` is subtracted from box coordinates
/// on the cropped axis only; the other axis is never touched.
#[derive(Debug, Clone)]
pub struct CenterCrop {
    canvas: Canvas,
}

impl CenterCrop {
    pub fn new(canvas: Canvas) -> Self {
        Self { canvas }
    }
}

impl Transform<Frame, Frame> for CenterCrop {
    fn apply(&self, mut frame: Frame) -> Result<Frame> {
        let (w, h) = frame.dimensions();
        let crop_w = w.min(self.canvas.width);
        let crop_h = h.min(self.canvas.height);
        if crop_w == w && crop_h == h {
            return Ok(frame);
        }
        let off_x = (w - crop_w) / 2;
        let off_y = (h - crop_h) / 2;
        frame.image = frame.image.crop_imm(off_x, off_y, crop_w, crop_h);
        frame.map_boxes(|b| Some(b.translate(-f64::from(off_x), -f64::from(off_y))));
        Ok(frame)
    }
}

// ============================================================================
// PadToCanvas
// ============================================================================

/// Centers the image on a canvas of the target size on every axis where it
/// is smaller, filling the border per [`BorderMode`]. Boxes shift by the
/// padding offset (opposite sign of the crop offset).
#[derive(Debug, Clone)]
pub struct PadToCanvas {
    canvas: Canvas,
    border: BorderMode,
}

impl PadToCanvas {
    pub fn new(canvas: Canvas, border: BorderMode) -> Self {
        Self { canvas, border }
    }
}

impl Transform<Frame, Frame> for PadToCanvas {
    fn apply(&self, mut frame: Frame) -> Result<Frame> {
        let (w, h) = frame.dimensions();
        let out_w = w.max(self.canvas.width);
        let out_h = h.max(self.canvas.height);
        if out_w == w && out_h == h {
            return Ok(frame);
        }
        let off_x = (out_w - w) / 2;
        let off_y = (out_h - h) / 2;
        let src = frame.image.to_rgb8();
        let padded = match self.border {
            BorderMode::Solid(fill) => {
                let mut out = RgbImage::from_pixel(out_w, out_h, fill);
                out.copy_from(&src, off_x, off_y)
                    .context("Failed to place image on padded canvas")?;
                out
            }
            BorderMode::Reflect => reflect_pad(&src, off_x, off_y, out_w, out_h),
        };
        frame.image = DynamicImage::ImageRgb8(padded);
        frame.map_boxes(|b| Some(b.translate(f64::from(off_x), f64::from(off_y))));
        Ok(frame)
    }
}

/// Mirror-pads `src` onto an `out_w x out_h` canvas with the image placed at
/// `(left, top)`. Edge pixels are included in the reflection, matching
/// OpenCV's `BORDER_REFLECT` (`fedcba|abcdefgh|hgfedcb`).
pub(crate) fn reflect_pad(src: &RgbImage, left: u32, top: u32, out_w: u32, out_h: u32) -> RgbImage {
    let (w, h) = src.dimensions();
    let mut out = RgbImage::new(out_w, out_h);
    for y in 0..out_h {
        let sy = reflect_index(i64::from(y) - i64::from(top), h);
        for x in 0..out_w {
            let sx = reflect_index(i64::from(x) - i64::from(left), w);
            out.put_pixel(x, y, *src.get_pixel(sx, sy));
        }
    }
    out
}

fn reflect_index(mut i: i64, n: u32) -> u32 {
    let n = i64::from(n);
    // Converges for any pad width, not just pads narrower than the image.
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - 1 - i;
        } else {
            return i as u32;
        }
    }
}

// ============================================================================
// CanvasFit
// ============================================================================

/// Configuration for the full fit-to-canvas pipeline.
#[derive(Debug, Clone)]
pub struct CanvasFitConfig {
    pub canvas: Canvas,
    pub axis: LockedAxis,
    pub border: BorderMode,
    pub filter: FilterType,
    /// Slack in the `longest > target / 2 + margin` oversized-object test.
    pub oversize_margin: f64,
    /// Extra pixels added around an enlarged canvas so the object is never
    /// cropped out.
    pub enlargement_padding: u32,
}

impl CanvasFitConfig {
    pub fn new(canvas: Canvas) -> Self {
        Self {
            canvas,
            axis: LockedAxis::Width,
            border: BorderMode::Solid(Rgb([255, 255, 255])),
            filter: FilterType::Triangle,
            oversize_margin: 40.0,
            enlargement_padding: 50,
        }
    }

    pub fn axis(mut self, axis: LockedAxis) -> Self {
        self.axis = axis;
        self
    }

    pub fn border(mut self, border: BorderMode) -> Self {
        self.border = border;
        self
    }

    pub fn filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn oversize_margin(mut self, margin: f64) -> Self {
        self.oversize_margin = margin;
        self
    }

    pub fn enlargement_padding(mut self, padding: u32) -> Self {
        self.enlargement_padding = padding;
        self
    }
}

/// The geometric transform engine: resize → center-crop → clamp → pad, with
/// the mandatory canvas-enlargement policy for oversized objects.
///
/// When the longest scaled box side exceeds `target` (or
/// `target / 2 + margin`), the crop/pad stage runs against an enlarged
/// square canvas of `max(longest, target) + enlargement_padding` and the
/// result is downscaled back to the requested size, boxes rescaled by the
/// same factor as the image.
#[derive(Debug, Clone)]
pub struct CanvasFit {
    config: CanvasFitConfig,
}

impl CanvasFit {
    pub fn new(config: CanvasFitConfig) -> Self {
        Self { config }
    }

    pub fn canvas(&self) -> Canvas {
        self.config.canvas
    }

    fn fit_to(&self, frame: Frame, canvas: Canvas) -> Result<Frame> {
        let mut frame = CenterCrop::new(canvas)
            .then(PadToCanvas::new(canvas, self.config.border))
            .apply(frame)?;
        // After crop and pad the image equals the canvas, so clamping here
        // is a clamp against the canvas. Clamping before the pad would run
        // against the smaller pre-pad image and collapse exactly the
        // oversized boxes the enlargement policy protects.
        frame.clamp_boxes();
        Ok(frame)
    }
}

impl Transform<Frame, Frame> for CanvasFit {
    fn apply(&self, frame: Frame) -> Result<Frame> {
        let cfg = &self.config;
        let target = u32::max(cfg.canvas.width, cfg.canvas.height);

        let frame = Resize::new(
            match cfg.axis {
                LockedAxis::Width => cfg.canvas.width,
                LockedAxis::Height => cfg.canvas.height,
            },
            cfg.axis,
            cfg.filter,
        )?
        .apply(frame)?;

        let longest = frame
            .objects
            .iter()
            .map(|o| o.bbox.longest_side())
            .fold(0.0_f64, f64::max);
        let target_f = f64::from(target);

        if longest > target_f || longest > target_f / 2.0 + cfg.oversize_margin {
            // Oversized object: crop/pad against an enlarged square canvas,
            // then downscale everything back to the requested size.
            let side = longest.max(target_f).round() as u32 + cfg.enlargement_padding;
            debug!("oversized object ({longest:.1}px), enlarging canvas to {side}x{side}");
            let mut frame = self.fit_to(frame, Canvas::square(side)?)?;
            let fx = f64::from(cfg.canvas.width) / f64::from(side);
            let fy = f64::from(cfg.canvas.height) / f64::from(side);
            frame.image =
                frame
                    .image
                    .resize_exact(cfg.canvas.width, cfg.canvas.height, cfg.filter);
            frame.map_boxes(|b| Some(b.scale(fx, fy)));
            Ok(frame)
        } else {
            self.fit_to(frame, cfg.canvas)
        }
    }
}

// ============================================================================
// SquareObjectCrop
// ============================================================================

/// Cuts one square training chip per object: the box is centered inside a
/// square of the target size with symmetric padding, and the same
/// enlargement policy as [`CanvasFit`] applies when the object is bigger
/// than the chip.
#[derive(Debug, Clone)]
pub struct SquareObjectCrop {
    pub target: u32,
    pub margin: f64,
    pub extra_padding: u32,
    pub fill: Rgb<u8>,
    pub filter: FilterType,
}

impl SquareObjectCrop {
    pub fn new(target: u32) -> Result<Self> {
        ensure!(target > 0, "Chip size must be positive (got {target})");
        Ok(Self {
            target,
            margin: 40.0,
            extra_padding: 50,
            fill: Rgb([255, 255, 255]),
            filter: FilterType::Triangle,
        })
    }

    /// Produces the chip for one object of a source frame.
    pub fn apply_object(&self, image: &DynamicImage, object: &ObjectAnnotation) -> Result<Frame> {
        let bbox = object.bbox;
        let (bw, bh) = (bbox.width(), bbox.height());
        ensure!(
            bw > 0.0 && bh > 0.0,
            "Cannot crop a chip around a zero-area box"
        );
        let target_f = f64::from(self.target);
        let initial = bw.max(bh);

        let size = if initial > target_f || initial > target_f / 2.0 + self.margin {
            initial.round() as u32 + self.extra_padding
        } else {
            self.target
        };
        let size_f = f64::from(size);

        let pad_w = (size_f - bw) / 2.0;
        let pad_h = (size_f - bh) / 2.0;

        // Requested crop window, allowed to spill outside the source image.
        let left = (bbox.xtl - pad_w).round() as i64;
        let upper = (bbox.ytl - pad_h).round() as i64;
        let crop_w = (bbox.xbr + pad_w).round() as i64 - left;
        let crop_h = (bbox.ybr + pad_h).round() as i64 - upper;

        let mut chip = RgbImage::from_pixel(size, size, self.fill);
        let paste_x = (i64::from(size) - crop_w) / 2;
        let paste_y = (i64::from(size) - crop_h) / 2;

        // Copy only the part of the window that overlaps the source.
        let src = image.to_rgb8();
        let (sw, sh) = (i64::from(src.width()), i64::from(src.height()));
        let x0 = left.max(0);
        let y0 = upper.max(0);
        let x1 = (left + crop_w).min(sw);
        let y1 = (upper + crop_h).min(sh);
        if x0 < x1 && y0 < y1 {
            let window = image.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32);
            let dst_x = (paste_x + (x0 - left)).max(0) as u32;
            let dst_y = (paste_y + (y0 - upper)).max(0) as u32;
            chip.copy_from(&window.to_rgb8(), dst_x, dst_y)
                .context("Failed to place cropped window on chip")?;
        }

        let chip_box = BBox {
            xtl: pad_w,
            ytl: pad_h,
            xbr: pad_w + bw,
            ybr: pad_h + bh,
        };
        let mut frame = Frame::new(
            DynamicImage::ImageRgb8(chip),
            vec![ObjectAnnotation {
                label: object.label.clone(),
                bbox: chip_box,
                flags: object.flags,
            }],
        );

        if size != self.target {
            let ratio = target_f / size_f;
            frame.image = frame.image.resize_exact(self.target, self.target, self.filter);
            frame.map_boxes(|b| Some(b.scale(ratio, ratio)));
        }
        frame.clamp_boxes();
        Ok(frame)
    }
}
