//! The `Frame` value threaded through transform steps: one image plus all
//! of its box annotations, with a running count of dropped objects.

use crate::annotation::model::ObjectAnnotation;
use crate::geometry::BBox;
use image::DynamicImage;

#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub objects: Vec<ObjectAnnotation>,
    /// Objects removed so far because a transform collapsed their box.
    /// Carried with the frame so no drop is ever silent.
    pub dropped: usize,
}

impl Frame {
    pub fn new(image: DynamicImage, objects: Vec<ObjectAnnotation>) -> Self {
        Self {
            image,
            objects,
            dropped: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Applies a coordinate map to every box. A `None` result drops the
    /// object and bumps the drop counter; flags always travel untouched.
    pub fn map_boxes(&mut self, f: impl Fn(&BBox) -> Option<BBox>) {
        let before = self.objects.len();
        self.objects.retain_mut(|object| match f(&object.bbox) {
            Some(bbox) => {
                object.bbox = bbox;
                true
            }
            None => false,
        });
        self.dropped += before - self.objects.len();
    }

    /// Clamps every box to the current image bounds, dropping collapsed
    /// ones. The standard post-step cleanup for geometric transforms.
    pub fn clamp_boxes(&mut self) {
        let (w, h) = self.dimensions();
        self.map_boxes(|b| b.clamp(f64::from(w), f64::from(h)));
    }
}
