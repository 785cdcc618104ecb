use detection_prep::annotation::ObjectAnnotation;
use detection_prep::geometry::BBox;
use detection_prep::transforms::frame::Frame;

use anyhow::Result;
use image::{DynamicImage, Rgb, RgbImage};

/// Creates a gray test image with a marker pixel at the top-left corner so
/// flips and crops are detectable in the pixel data.
pub fn marker_image(width: u32, height: u32) -> DynamicImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([120, 120, 120]));
    img.put_pixel(0, 0, Rgb([255, 0, 0]));
    DynamicImage::ImageRgb8(img)
}

pub fn object(label: &str, xtl: f64, ytl: f64, xbr: f64, ybr: f64) -> Result<ObjectAnnotation> {
    Ok(ObjectAnnotation::new(label, BBox::new(xtl, ytl, xbr, ybr)?))
}

/// A frame over a marker image with the given boxes.
pub fn frame_with(width: u32, height: u32, boxes: &[(f64, f64, f64, f64)]) -> Result<Frame> {
    let objects = boxes
        .iter()
        .map(|&(xtl, ytl, xbr, ybr)| object("banana", xtl, ytl, xbr, ybr))
        .collect::<Result<Vec<_>>>()?;
    Ok(Frame::new(marker_image(width, height), objects))
}
