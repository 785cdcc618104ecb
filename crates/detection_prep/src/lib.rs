//! Prepares labeled video frames for object-detection training.
//!
//! The crate converts per-frame annotations drawn in a video-annotation
//! tool's coordinate space (CVAT-for-video XML) into fixed-size training
//! images with remapped bounding boxes, and synthesizes additional labeled
//! samples through seeded geometric/photometric augmentation.
//!
//! # Architecture Overview
//!
//! ```text
//!               ┌────────────┐
//!               │ CvatReader │ (annotation source)
//!               └─────┬──────┘
//!                     │ per-frame object lists
//!                     ↓
//!              ┌─────────────┐
//!              │  CanvasFit  │ (resize → crop → clamp → pad)
//!              └─────┬───────┘
//!                    │ canvas-sized Frame
//!                    ↓
//!              ┌─────────────┐
//!              │  Augmenter  │ (N seeded variants per frame)
//!              └─────┬───────┘
//!                    │ transformed image + box list
//!                    ↓
//!            ┌────────────────┐
//!            │ AnnotationSink │ (one Pascal VOC record per image)
//!            └────────────────┘
//! ```
//!
//! Coordinates are carried as `f64` through the whole pipeline and rounded
//! exactly once, at the Pascal VOC writer boundary. Every drop of a
//! degenerate box is counted so data loss stays observable.

pub mod annotation;
pub mod error;
pub mod geometry;
pub mod overlay;
pub mod pipeline;
pub mod transforms;

pub use annotation::{
    AnnotationSink, BoxFlags, CvatReader, FrameAnnotation, ObjectAnnotation, VocObject, VocRecord,
    WriteMode,
};
pub use error::PrepError;
pub use geometry::{BBox, Canvas};
pub use overlay::OverlayContext;
pub use pipeline::{BatchRunner, RunStats, RunnerConfig};
pub use transforms::augmentation::{Augmenter, AugmenterConfig};
pub use transforms::frame::Frame;
pub use transforms::geometric::{BorderMode, CanvasFit, CanvasFitConfig, LockedAxis};
pub use transforms::Transform;
