//! Axis-aligned bounding-box geometry in pixel coordinates.
//!
//! All coordinate math runs on `f64` corners. Rounding happens exactly once,
//! at the annotation-writer boundary, never mid-pipeline, so composed
//! transforms do not accumulate drift.

use anyhow::{ensure, Result};

/// The fixed output raster that all transformed boxes must fit within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        ensure!(
            width > 0 && height > 0,
            "Canvas dimensions must be positive (got {}x{})",
            width,
            height
        );
        Ok(Self { width, height })
    }

    /// A square canvas, the common case for detection chips.
    pub fn square(size: u32) -> Result<Self> {
        Self::new(size, size)
    }
}

/// Axis-aligned rectangle `(xtl, ytl)`-`(xbr, ybr)` in the pixel space of a
/// specific image. Invariant: `xtl <= xbr` and `ytl <= ybr`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub xtl: f64,
    pub ytl: f64,
    pub xbr: f64,
    pub ybr: f64,
}

impl BBox {
    pub fn new(xtl: f64, ytl: f64, xbr: f64, ybr: f64) -> Result<Self> {
        ensure!(
            xtl <= xbr && ytl <= ybr,
            "Box corners must be ordered (got ({}, {})-({}, {}))",
            xtl,
            ytl,
            xbr,
            ybr
        );
        Ok(Self { xtl, ytl, xbr, ybr })
    }

    pub fn width(&self) -> f64 {
        self.xbr - self.xtl
    }

    pub fn height(&self) -> f64 {
        self.ybr - self.ytl
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Longest side, used by the oversized-object canvas-enlargement policy.
    pub fn longest_side(&self) -> f64 {
        self.width().max(self.height())
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.xtl + self.xbr) / 2.0,
            (self.ytl + self.ybr) / 2.0,
        )
    }

    /// Scales both corners by per-axis factors. The factors must match the
    /// ones applied to the owning image.
    pub fn scale(&self, sx: f64, sy: f64) -> BBox {
        BBox {
            xtl: self.xtl * sx,
            ytl: self.ytl * sy,
            xbr: self.xbr * sx,
            ybr: self.ybr * sy,
        }
    }

    pub fn translate(&self, dx: f64, dy: f64) -> BBox {
        BBox {
            xtl: self.xtl + dx,
            ytl: self.ytl + dy,
            xbr: self.xbr + dx,
            ybr: self.ybr + dy,
        }
    }

    /// Mirror across the vertical centerline of a canvas of width `w`.
    pub fn hflip(&self, w: f64) -> BBox {
        BBox {
            xtl: w - self.xbr,
            ytl: self.ytl,
            xbr: w - self.xtl,
            ybr: self.ybr,
        }
    }

    /// Mirror across the horizontal centerline of a canvas of height `h`.
    pub fn vflip(&self, h: f64) -> BBox {
        BBox {
            xtl: self.xtl,
            ytl: h - self.ybr,
            xbr: self.xbr,
            ybr: h - self.ytl,
        }
    }

    /// Axis-aligned hull of the four corners rotated by `theta` radians
    /// about `(cx, cy)`, in image coordinates (y grows downward).
    ///
    /// This is the only geometrically lossy box transform in the crate: the
    /// hull of a rotated rectangle is strictly larger than the rectangle
    /// itself for any non-axis-aligned angle.
    pub fn rotate_bound(&self, cx: f64, cy: f64, theta: f64) -> BBox {
        let (sin, cos) = theta.sin_cos();
        let corners = [
            (self.xtl, self.ytl),
            (self.xbr, self.ytl),
            (self.xbr, self.ybr),
            (self.xtl, self.ybr),
        ];
        let mut xtl = f64::INFINITY;
        let mut ytl = f64::INFINITY;
        let mut xbr = f64::NEG_INFINITY;
        let mut ybr = f64::NEG_INFINITY;
        for (x, y) in corners {
            let rx = cx + (x - cx) * cos - (y - cy) * sin;
            let ry = cy + (x - cx) * sin + (y - cy) * cos;
            xtl = xtl.min(rx);
            ytl = ytl.min(ry);
            xbr = xbr.max(rx);
            ybr = ybr.max(ry);
        }
        BBox { xtl, ytl, xbr, ybr }
    }

    /// Overlap region with another box, `None` when they do not intersect
    /// with positive area.
    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        let xtl = self.xtl.max(other.xtl);
        let ytl = self.ytl.max(other.ytl);
        let xbr = self.xbr.min(other.xbr);
        let ybr = self.ybr.min(other.ybr);
        if xtl < xbr && ytl < ybr {
            Some(BBox { xtl, ytl, xbr, ybr })
        } else {
            None
        }
    }

    /// Clamps the corners to `[0, w] x [0, h]`. Returns `None` when the
    /// clamp collapses width or height to zero; such a box must be dropped,
    /// not written.
    pub fn clamp(&self, w: f64, h: f64) -> Option<BBox> {
        let xtl = self.xtl.max(0.0);
        let ytl = self.ytl.max(0.0);
        let xbr = self.xbr.min(w);
        let ybr = self.ybr.min(h);
        if xtl < xbr && ytl < ybr {
            Some(BBox { xtl, ytl, xbr, ybr })
        } else {
            None
        }
    }
}
