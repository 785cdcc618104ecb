//! Pascal VOC annotation records.
//!
//! One record describes one output image and holds the ordered list of all
//! valid objects on it. Box coordinates stay `f64` until they are rendered
//! here, where they are rounded to two decimals — the single rounding point
//! of the whole pipeline.

use crate::error::PrepError;
use crate::geometry::Canvas;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as _;

/// One `<object>` entry of a Pascal VOC record.
#[derive(Debug, Clone, PartialEq)]
pub struct VocObject {
    pub name: String,
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub truncated: bool,
    pub occluded: bool,
    pub difficult: bool,
}

impl VocObject {
    pub fn new(name: impl Into<String>, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            name: name.into(),
            xmin,
            ymin,
            xmax,
            ymax,
            truncated: false,
            occluded: false,
            difficult: false,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }
}

/// A full Pascal VOC annotation for one output image.
#[derive(Debug, Clone, PartialEq)]
pub struct VocRecord {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub objects: Vec<VocObject>,
}

impl VocRecord {
    pub fn new(filename: impl Into<String>, canvas: Canvas) -> Self {
        Self {
            filename: filename.into(),
            width: canvas.width,
            height: canvas.height,
            objects: Vec::new(),
        }
    }

    /// Appends an object, enforcing the output-canvas contract
    /// `0 <= xmin < xmax <= width` and `0 <= ymin < ymax <= height`.
    pub fn push_object(&mut self, object: VocObject) -> Result<(), PrepError> {
        let degenerate = || PrepError::DegenerateBox {
            xtl: object.xmin,
            ytl: object.ymin,
            xbr: object.xmax,
            ybr: object.ymax,
        };
        if !(object.xmin < object.xmax && object.ymin < object.ymax) {
            return Err(degenerate());
        }
        if object.xmin < 0.0
            || object.ymin < 0.0
            || object.xmax > f64::from(self.width)
            || object.ymax > f64::from(self.height)
        {
            return Err(degenerate());
        }
        self.objects.push(object);
        Ok(())
    }

    /// Per-object `(label, area_px, fraction_of_canvas)`, reported by the
    /// orchestrator so undersized or runaway boxes show up in run output.
    pub fn object_area_fractions(&self) -> Vec<(String, f64, f64)> {
        let canvas_area = f64::from(self.width) * f64::from(self.height);
        self.objects
            .iter()
            .map(|o| {
                let area = o.width() * o.height();
                (o.name.clone(), area, area / canvas_area)
            })
            .collect()
    }

    /// Renders the record as Pascal VOC XML. Coordinates are rounded to two
    /// decimals here and nowhere else.
    pub fn to_xml(&self) -> String {
        let mut objects = String::new();
        for o in &self.objects {
            let _ = write!(
                objects,
                r#"
  <object>
    <name>{}</name>
    <truncated>{}</truncated>
    <occluded>{}</occluded>
    <difficult>{}</difficult>
    <bndbox>
      <xmin>{:.2}</xmin>
      <ymin>{:.2}</ymin>
      <xmax>{:.2}</xmax>
      <ymax>{:.2}</ymax>
    </bndbox>
  </object>"#,
                o.name,
                u8::from(o.truncated),
                u8::from(o.occluded),
                u8::from(o.difficult),
                o.xmin,
                o.ymin,
                o.xmax,
                o.ymax,
            );
        }
        format!(
            r#"<annotation>
  <folder>frame</folder>
  <filename>{}</filename>
  <source>
    <database>Unknown</database>
  </source>
  <size>
    <width>{}</width>
    <height>{}</height>
    <depth>3</depth>
  </size>
  <segmented>0</segmented>{}
</annotation>
"#,
            self.filename, self.width, self.height, objects
        )
    }

    /// Parses a record previously written by [`VocRecord::to_xml`]. Used to
    /// re-open an existing annotation when appending, so earlier objects are
    /// preserved exactly.
    pub fn from_xml(xml: &str) -> Result<Self, PrepError> {
        let mut reader = Reader::from_str(xml);

        let mut record = VocRecord {
            filename: String::new(),
            width: 0,
            height: 0,
            objects: Vec::new(),
        };
        let mut current: Option<VocObject> = None;
        let mut element: Vec<u8> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    element = e.name().as_ref().to_vec();
                    if element == b"object" {
                        current = Some(VocObject::new("", 0.0, 0.0, 0.0, 0.0));
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|err| PrepError::Parse(err.to_string()))?;
                    let text = text.trim();
                    if !text.is_empty() {
                        fill_field(&mut record, &mut current, &element, text)?;
                    }
                }
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"object" {
                        let object = current.take().ok_or_else(|| {
                            PrepError::Parse("unbalanced <object> element".into())
                        })?;
                        record.objects.push(object);
                    }
                    element.clear();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(PrepError::Parse(err.to_string())),
            }
        }

        if record.filename.is_empty() || record.width == 0 || record.height == 0 {
            return Err(PrepError::Parse(
                "annotation record is missing filename or size".into(),
            ));
        }
        Ok(record)
    }
}

fn fill_field(
    record: &mut VocRecord,
    current: &mut Option<VocObject>,
    element: &[u8],
    text: &str,
) -> Result<(), PrepError> {
    let number = |what: &str| -> Result<f64, PrepError> {
        text.parse::<f64>()
            .map_err(|err| PrepError::Parse(format!("bad <{what}> value '{text}': {err}")))
    };
    match element {
        b"filename" => record.filename = text.to_owned(),
        b"width" => record.width = number("width")? as u32,
        b"height" => record.height = number("height")? as u32,
        b"name" => {
            if let Some(o) = current {
                o.name = text.to_owned();
            }
        }
        b"truncated" => {
            if let Some(o) = current {
                o.truncated = text == "1";
            }
        }
        b"occluded" => {
            if let Some(o) = current {
                o.occluded = text == "1";
            }
        }
        b"difficult" => {
            if let Some(o) = current {
                o.difficult = text == "1";
            }
        }
        b"xmin" => {
            if let Some(o) = current {
                o.xmin = number("xmin")?;
            }
        }
        b"ymin" => {
            if let Some(o) = current {
                o.ymin = number("ymin")?;
            }
        }
        b"xmax" => {
            if let Some(o) = current {
                o.xmax = number("xmax")?;
            }
        }
        b"ymax" => {
            if let Some(o) = current {
                o.ymax = number("ymax")?;
            }
        }
        _ => {}
    }
    Ok(())
}
