//! Reader for CVAT-for-video annotation documents.
//!
//! The consumed subset of the format is the per-track box list:
//!
//! ```text
//! <annotations>
//!   <track id="0" label="banana">
//!     <box frame="12" xtl="700.1" ytl="550.0" xbr="780.4" ybr="650.9"
//!          occluded="0" outside="0" keyframe="1" z_order="0"/>
//!   </track>
//! </annotations>
//! ```
//!
//! Multiple tracks describing the same frame are merged into one
//! [`FrameAnnotation`]; duplicate `(frame, label)` pairs collapse to one
//! object with the first occurrence winning, so one physical object never
//! yields conflicting duplicate boxes.

use crate::annotation::model::{BoxFlags, FrameAnnotation, ObjectAnnotation};
use crate::error::PrepError;
use crate::geometry::BBox;
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Reads a CVAT XML document into per-frame object lists.
pub struct CvatReader {
    path: PathBuf,
}

impl CvatReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parses the document, keeping only objects whose label is in `filter`
    /// (all labels when `filter` is `None`). Frames come back in ascending
    /// frame-id order, one entry per frame with at least one matching object.
    ///
    /// # Errors
    /// - [`PrepError::Parse`] when the XML is malformed or a required box
    ///   attribute is missing (fatal to the batch).
    /// - [`PrepError::EmptyResult`] when no frame matches the filter
    ///   (recoverable; callers log and skip).
    pub fn read(&self, filter: Option<&[&str]>) -> Result<Vec<FrameAnnotation>, PrepError> {
        let xml = fs::read_to_string(&self.path)?;
        parse_document(&xml, filter)
    }
}

/// The standard frame-to-filename mapping used by the frame extractor.
pub fn image_ref_for(frame_id: u32) -> String {
    format!("frame_{frame_id}.png")
}

/// Parses a CVAT document already held in memory. See [`CvatReader::read`].
pub fn parse_document(
    xml: &str,
    filter: Option<&[&str]>,
) -> Result<Vec<FrameAnnotation>, PrepError> {
    let mut reader = Reader::from_str(xml);

    // BTreeMap keeps frames in ascending frame-id order for free.
    let mut frames: BTreeMap<u32, Vec<ObjectAnnotation>> = BTreeMap::new();
    let mut track_label: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"track" => {
                    track_label = Some(required_attr(&e, "label")?);
                }
                b"box" => {
                    let object = parse_box(&e, track_label.as_deref())?;
                    let frame_id = required_attr(&e, "frame")?
                        .parse::<u32>()
                        .map_err(|err| PrepError::Parse(format!("bad frame attribute: {err}")))?;
                    let keep = filter
                        .map(|labels| labels.contains(&object.label.as_str()))
                        .unwrap_or(true);
                    if !keep {
                        continue;
                    }
                    let objects = frames.entry(frame_id).or_default();
                    // First occurrence of a (frame, label) pair wins.
                    if objects.iter().any(|o| o.label == object.label) {
                        debug!(
                            "duplicate ({frame_id}, {}) box ignored, first occurrence kept",
                            object.label
                        );
                        continue;
                    }
                    objects.push(object);
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"track" => {
                track_label = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(PrepError::Parse(err.to_string())),
        }
    }

    if frames.is_empty() {
        return Err(PrepError::EmptyResult);
    }

    Ok(frames
        .into_iter()
        .map(|(frame_id, objects)| FrameAnnotation {
            frame_id,
            image_ref: image_ref_for(frame_id),
            objects,
        })
        .collect())
}

fn parse_box(e: &BytesStart<'_>, track_label: Option<&str>) -> Result<ObjectAnnotation, PrepError> {
    // Per-box labels (image-based exports) override the track label.
    let label = match optional_attr(e, "label")? {
        Some(label) => label,
        None => track_label
            .map(str::to_owned)
            .ok_or_else(|| PrepError::Parse("box without a label or enclosing track".into()))?,
    };

    let corner = |name: &str| -> Result<f64, PrepError> {
        required_attr(e, name)?
            .parse::<f64>()
            .map_err(|err| PrepError::Parse(format!("bad {name} attribute: {err}")))
    };
    let bbox = BBox::new(corner("xtl")?, corner("ytl")?, corner("xbr")?, corner("ybr")?)
        .map_err(|err| PrepError::Parse(err.to_string()))?;

    let flag = |name: &str| -> Result<bool, PrepError> {
        Ok(optional_attr(e, name)?.as_deref() == Some("1"))
    };
    let flags = BoxFlags {
        occluded: flag("occluded")?,
        outside: flag("outside")?,
        keyframe: flag("keyframe")?,
        z_order: optional_attr(e, "z_order")?
            .map(|z| {
                z.parse::<i32>()
                    .map_err(|err| PrepError::Parse(format!("bad z_order attribute: {err}")))
            })
            .transpose()?
            .unwrap_or(0),
    };

    Ok(ObjectAnnotation { label, bbox, flags })
}

fn required_attr(e: &BytesStart<'_>, name: &str) -> Result<String, PrepError> {
    optional_attr(e, name)?.ok_or_else(|| {
        PrepError::Parse(format!(
            "<{}> is missing required attribute '{name}'",
            String::from_utf8_lossy(e.name().as_ref())
        ))
    })
}

fn optional_attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, PrepError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| PrepError::Parse(err.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| PrepError::Parse(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
