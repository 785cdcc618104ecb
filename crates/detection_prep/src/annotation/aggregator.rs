//! Per-output-frame annotation accumulation.
//!
//! The sink keys accumulation state by target image filename. The first
//! object written for a key creates the record, subsequent objects append to
//! it, and appending never rewrites earlier entries. The caller states its
//! intent with an explicit [`WriteMode`] rather than a mutable
//! "is this the first object" flag carried across loop iterations.
//!
//! Writing is **not** idempotent across repeated runs against the same
//! output directory: re-running with the same keys appends again unless
//! [`AnnotationSink::reset`] clears the prior record first.

use crate::error::PrepError;
use crate::geometry::Canvas;
use crate::annotation::voc::{VocObject, VocRecord};
use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Caller intent for one object write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Start a fresh record for the key, discarding any in-memory or
    /// on-disk record with the same key.
    Create,
    /// Extend the existing record for the key; re-opens the on-disk record
    /// when it is not in memory, preserving previously written objects.
    Append,
}

/// Accumulates one Pascal VOC record per output image and writes them out.
pub struct AnnotationSink {
    dir: PathBuf,
    records: HashMap<String, VocRecord>,
    objects_written: usize,
}

impl AnnotationSink {
    /// `dir` is the annotation output directory; it is created on flush.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            records: HashMap::new(),
            objects_written: 0,
        }
    }

    /// Adds one object under `key` (the output image filename).
    pub fn add(
        &mut self,
        key: &str,
        mode: WriteMode,
        canvas: Canvas,
        object: VocObject,
    ) -> Result<(), PrepError> {
        let record = match mode {
            WriteMode::Create => {
                debug!("creating annotation record for {key}");
                self.records
                    .insert(key.to_owned(), VocRecord::new(key, canvas));
                self.records.get_mut(key).unwrap()
            }
            WriteMode::Append => {
                if !self.records.contains_key(key) {
                    // Re-open a record written by an earlier flush. Earlier
                    // objects are preserved exactly.
                    let existing = fs::read_to_string(self.annotation_path(key))?;
                    self.records
                        .insert(key.to_owned(), VocRecord::from_xml(&existing)?);
                }
                self.records.get_mut(key).unwrap()
            }
        };
        record.push_object(object)?;
        self.objects_written += 1;
        Ok(())
    }

    /// Drops the record for `key`, both in memory and on disk. This is the
    /// explicit reset that makes a subsequent run idempotent for that key.
    pub fn reset(&mut self, key: &str) -> Result<()> {
        self.records.remove(key);
        let path = self.annotation_path(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    pub fn record(&self, key: &str) -> Option<&VocRecord> {
        self.records.get(key)
    }

    /// Total objects accepted since construction.
    pub fn objects_written(&self) -> usize {
        self.objects_written
    }

    /// Writes every accumulated record to the output directory, one XML
    /// file per output image. Returns the number of records written.
    pub fn flush(&self) -> Result<usize> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        for (key, record) in &self.records {
            let path = self.annotation_path(key);
            fs::write(&path, record.to_xml())
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(self.records.len())
    }

    fn annotation_path(&self, key: &str) -> PathBuf {
        let stem = Path::new(key)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_owned());
        self.dir.join(format!("{stem}.xml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn canvas() -> Canvas {
        Canvas::square(128).unwrap()
    }

    fn object(name: &str, xmin: f64) -> VocObject {
        VocObject::new(name, xmin, 10.0, xmin + 20.0, 40.0)
    }

    #[test]
    fn test_create_then_append_yields_one_record_in_order() -> Result<()> {
        let dir = tempdir()?;
        let mut sink = AnnotationSink::new(dir.path());

        sink.add("frame_3.png", WriteMode::Create, canvas(), object("banana", 5.0))?;
        sink.add("frame_3.png", WriteMode::Append, canvas(), object("apple", 50.0))?;

        let record = sink.record("frame_3.png").unwrap();
        assert_eq!(record.objects.len(), 2);
        assert_eq!(record.objects[0].name, "banana");
        assert_eq!(record.objects[1].name, "apple");
        assert_eq!(sink.objects_written(), 2);
        Ok(())
    }

    #[test]
    fn test_append_reopens_flushed_record_preserving_objects() -> Result<()> {
        let dir = tempdir()?;
        {
            let mut sink = AnnotationSink::new(dir.path());
            sink.add("frame_3.png", WriteMode::Create, canvas(), object("banana", 5.0))?;
            sink.flush()?;
        }

        // A fresh sink (fresh run) appends to the record written above.
        let mut sink = AnnotationSink::new(dir.path());
        sink.add("frame_3.png", WriteMode::Append, canvas(), object("apple", 50.0))?;
        sink.flush()?;

        let written = std::fs::read_to_string(dir.path().join("frame_3.xml"))?;
        let parsed = VocRecord::from_xml(&written)?;
        assert_eq!(parsed.objects.len(), 2);
        assert_eq!(parsed.objects[0].name, "banana");
        assert_eq!(parsed.objects[1].name, "apple");
        Ok(())
    }

    #[test]
    fn test_create_discards_prior_record_for_key() -> Result<()> {
        let dir = tempdir()?;
        let mut sink = AnnotationSink::new(dir.path());
        sink.add("frame_3.png", WriteMode::Create, canvas(), object("banana", 5.0))?;
        sink.add("frame_3.png", WriteMode::Create, canvas(), object("apple", 50.0))?;

        let record = sink.record("frame_3.png").unwrap();
        assert_eq!(record.objects.len(), 1);
        assert_eq!(record.objects[0].name, "apple");
        Ok(())
    }

    #[test]
    fn test_repeated_runs_are_not_idempotent_without_reset() -> Result<()> {
        let dir = tempdir()?;
        {
            let mut sink = AnnotationSink::new(dir.path());
            sink.add("frame_3.png", WriteMode::Create, canvas(), object("banana", 5.0))?;
            sink.flush()?;
        }

        // Two identical append runs duplicate the object: three on disk.
        for _ in 0..2 {
            let mut sink = AnnotationSink::new(dir.path());
            sink.add("frame_3.png", WriteMode::Append, canvas(), object("banana", 5.0))?;
            sink.flush()?;
        }
        let written = std::fs::read_to_string(dir.path().join("frame_3.xml"))?;
        assert_eq!(VocRecord::from_xml(&written)?.objects.len(), 3);

        // An explicit reset clears the key.
        let mut sink = AnnotationSink::new(dir.path());
        sink.reset("frame_3.png")?;
        assert!(!dir.path().join("frame_3.xml").exists());
        Ok(())
    }

    #[test]
    fn test_append_without_existing_record_fails() {
        let dir = tempdir().unwrap();
        let mut sink = AnnotationSink::new(dir.path());
        let err = sink
            .add("frame_9.png", WriteMode::Append, canvas(), object("banana", 5.0))
            .unwrap_err();
        assert!(matches!(err, PrepError::Io(_)));
    }
}
