//! Error taxonomy for dataset preparation.
//!
//! Only document-level parse failures are fatal: errors local to one frame
//! or one object are recoverable, and the pipeline skips the item, logs it,
//! and counts it in [`RunStats`](crate::pipeline::RunStats).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    /// The annotation document is not well-formed or a required attribute
    /// is missing. Fatal: aborts the whole batch.
    #[error("malformed annotation document: {0}")]
    Parse(String),

    /// A referenced source image is absent. Recoverable: skip the frame.
    #[error("referenced image not found: {}", .0.display())]
    MissingImage(PathBuf),

    /// A bounding box collapsed to zero width or height. Recoverable:
    /// drop the object, keep the frame.
    #[error("bounding box collapsed to zero area ({xtl:.2},{ytl:.2})-({xbr:.2},{ybr:.2})")]
    DegenerateBox {
        xtl: f64,
        ytl: f64,
        xbr: f64,
        ybr: f64,
    },

    /// No objects survived the label filter. Recoverable: skip.
    #[error("no annotations matched the requested labels")]
    EmptyResult,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}

impl PrepError {
    /// Whether the error must abort the batch rather than skip one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PrepError::Parse(_))
    }
}
