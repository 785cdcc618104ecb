//! Debug box-overlay context.
//!
//! Accumulates every box written for an output file during one batch run
//! and draws them onto the image on request. The context is owned by the
//! caller and scoped to a single run, replacing the process-wide mutable
//! storage the original tooling used for the same purpose.

use crate::geometry::BBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::collections::HashMap;

pub struct OverlayContext {
    boxes: HashMap<String, Vec<BBox>>,
    color: Rgb<u8>,
}

impl OverlayContext {
    pub fn new() -> Self {
        Self {
            boxes: HashMap::new(),
            color: Rgb([255, 0, 0]),
        }
    }

    pub fn with_color(mut self, color: Rgb<u8>) -> Self {
        self.color = color;
        self
    }

    /// Records one box under an output filename.
    pub fn record(&mut self, key: &str, bbox: BBox) {
        self.boxes.entry(key.to_owned()).or_default().push(bbox);
    }

    /// Draws every box recorded for `key` onto the image.
    pub fn draw_on(&self, key: &str, image: &mut RgbImage) {
        let Some(boxes) = self.boxes.get(key) else {
            return;
        };
        for b in boxes {
            let w = (b.width().round() as i64).max(1) as u32;
            let h = (b.height().round() as i64).max(1) as u32;
            let rect = Rect::at(b.xtl.round() as i32, b.ytl.round() as i32).of_size(w, h);
            draw_hollow_rect_mut(image, rect, self.color);
        }
    }

    pub fn recorded(&self, key: &str) -> usize {
        self.boxes.get(key).map_or(0, Vec::len)
    }
}

impl Default for OverlayContext {
    fn default() -> Self {
        Self::new()
    }
}
