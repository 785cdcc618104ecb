//! In-memory annotation model shared by the reader and the transform engine.

use crate::geometry::BBox;

/// Per-box metadata carried through transforms unchanged. Flags describe the
/// annotation, not the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoxFlags {
    pub occluded: bool,
    pub outside: bool,
    pub keyframe: bool,
    pub z_order: i32,
}

/// One labeled box inside one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAnnotation {
    pub label: String,
    pub bbox: BBox,
    pub flags: BoxFlags,
}

impl ObjectAnnotation {
    pub fn new(label: impl Into<String>, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            bbox,
            flags: BoxFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: BoxFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// All objects annotated on one source frame. Every object shares the same
/// source image space; object order is preserved through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnnotation {
    pub frame_id: u32,
    pub image_ref: String,
    pub objects: Vec<ObjectAnnotation>,
}

impl FrameAnnotation {
    pub fn new(frame_id: u32, image_ref: impl Into<String>) -> Self {
        Self {
            frame_id,
            image_ref: image_ref.into(),
            objects: Vec::new(),
        }
    }
}
