//! Annotation source reading, aggregation, and writing.
//!
//! ```text
//! annotation/
//! ├── model.rs       → in-memory per-frame object lists
//! ├── cvat.rs        → CVAT-for-video XML reader
//! ├── voc.rs         → Pascal VOC record render/parse
//! └── aggregator.rs  → per-output-frame accumulation and writing
//! ```

pub mod aggregator;
pub mod cvat;
pub mod model;
pub mod voc;

pub use aggregator::{AnnotationSink, WriteMode};
pub use cvat::CvatReader;
pub use model::{BoxFlags, FrameAnnotation, ObjectAnnotation};
pub use voc::{VocObject, VocRecord};
