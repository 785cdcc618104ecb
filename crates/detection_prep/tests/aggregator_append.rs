//! Aggregation semantics of the Pascal VOC annotation sink.
//!
//! Tests cover:
//! - Create then Append under one key yields a single ordered record
//! - Appending after a flush re-opens the file without losing objects
//! - Re-running without a reset duplicates objects (not idempotent)
//! - Reset clears both memory and disk for a key

mod common;
use common::object;

use detection_prep::annotation::{AnnotationSink, VocObject, WriteMode};
use detection_prep::geometry::Canvas;

use anyhow::Result;

fn voc(label: &str, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> VocObject {
    VocObject::new(label, xmin, ymin, xmax, ymax)
}

#[test]
fn test_create_then_append_is_one_ordered_record() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut sink = AnnotationSink::new(tmp.path());
    let canvas = Canvas::square(128)?;

    sink.add("frame_0.png", WriteMode::Create, canvas, voc("banana", 10.0, 20.0, 50.0, 60.0))?;
    sink.add("frame_0.png", WriteMode::Append, canvas, voc("apple", 70.0, 20.0, 110.0, 60.0))?;
    sink.flush()?;

    let record = sink.record("frame_0.png").unwrap();
    assert_eq!(record.objects.len(), 2);
    assert_eq!(record.objects[0].name, "banana");
    assert_eq!(record.objects[1].name, "apple");

    let xml = std::fs::read_to_string(tmp.path().join("frame_0.xml"))?;
    assert!(xml.find("banana").unwrap() < xml.find("apple").unwrap());
    Ok(())
}

#[test]
fn test_append_after_flush_preserves_earlier_objects() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let canvas = Canvas::square(128)?;

    {
        let mut sink = AnnotationSink::new(tmp.path());
        sink.add("frame_1.png", WriteMode::Create, canvas, voc("banana", 10.0, 20.0, 50.0, 60.0))?;
        sink.flush()?;
    }

    // A fresh sink has no memory of the earlier run; Append must re-open
    // the flushed file and extend it.
    let mut sink = AnnotationSink::new(tmp.path());
    sink.add("frame_1.png", WriteMode::Append, canvas, voc("apple", 70.0, 20.0, 110.0, 60.0))?;
    sink.flush()?;

    let record = sink.record("frame_1.png").unwrap();
    assert_eq!(record.objects.len(), 2);
    assert_eq!(record.objects[0].name, "banana");
    assert!((record.objects[0].xmin - 10.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn test_rerun_without_reset_duplicates() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let canvas = Canvas::square(128)?;

    for _ in 0..2 {
        let mut sink = AnnotationSink::new(tmp.path());
        sink.add("frame_2.png", WriteMode::Append, canvas, voc("banana", 10.0, 20.0, 50.0, 60.0))
            .or_else(|_| {
                // First run: nothing to append to yet.
                sink.add("frame_2.png", WriteMode::Create, canvas, voc("banana", 10.0, 20.0, 50.0, 60.0))
            })?;
        sink.flush()?;
    }

    let mut sink = AnnotationSink::new(tmp.path());
    sink.add("frame_2.png", WriteMode::Append, canvas, voc("apple", 70.0, 20.0, 110.0, 60.0))?;
    let record = sink.record("frame_2.png").unwrap();
    assert_eq!(record.objects.len(), 3, "duplicate from the re-run plus the append");

    sink.reset("frame_2.png")?;
    assert!(sink.record("frame_2.png").is_none());
    assert!(!tmp.path().join("frame_2.xml").exists());
    Ok(())
}

#[test]
fn test_degenerate_box_is_rejected_by_writer() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut sink = AnnotationSink::new(tmp.path());
    let canvas = Canvas::square(128)?;

    // Zero width
    let result = sink.add("frame_3.png", WriteMode::Create, canvas, voc("banana", 40.0, 10.0, 40.0, 90.0));
    assert!(result.is_err());

    // Sanity: a valid source annotation still converts cleanly.
    let obj = object("banana", 5.0, 5.0, 60.0, 70.0)?;
    sink.add(
        "frame_3.png",
        WriteMode::Create,
        canvas,
        voc(&obj.label, obj.bbox.xtl, obj.bbox.ytl, obj.bbox.xbr, obj.bbox.ybr),
    )?;
    assert_eq!(sink.record("frame_3.png").unwrap().objects.len(), 1);
    Ok(())
}
