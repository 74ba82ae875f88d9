//! PASCAL VOC annotation documents.
//!
//! One [`VocAnnotation`] is the single tagged representation of an
//! annotation file; it is produced by one parser and rendered by one
//! writer, so no component ever passes raw XML around. The writer is
//! deterministic: rendering the same value twice yields identical bytes,
//! which is what makes reconciliation re-runs idempotent.

use std::fs;
use std::path::Path;

use roxmltree::Node;

use crate::error::GridlabelError;

/// One labeled bounding box inside an annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VocObject {
    pub name: String,
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

impl VocObject {
    pub fn new(name: impl Into<String>, xmin: i64, ymin: i64, xmax: i64, ymax: i64) -> Self {
        Self {
            name: name.into(),
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Both crop dimensions strictly positive. Violations are rejected
    /// downstream, never clamped.
    pub fn has_valid_geometry(&self) -> bool {
        self.xmax > self.xmin && self.ymax > self.ymin
    }
}

/// One PASCAL VOC annotation document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VocAnnotation {
    pub folder: String,
    pub filename: String,
    pub path: String,
    pub database: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub segmented: bool,
    pub objects: Vec<VocObject>,
}

impl VocAnnotation {
    /// Builds an empty annotation (no objects) for a photographed grid
    /// that has no ledger record, using the image's probed dimensions.
    pub fn empty(folder: &str, image_file: &str, image_path: &str, width: u32, height: u32) -> Self {
        Self {
            folder: folder.to_string(),
            filename: image_file.to_string(),
            path: image_path.to_string(),
            database: "Unknown".to_string(),
            width,
            height,
            // Grid micrographs are 8-bit grayscale.
            depth: 8,
            segmented: false,
            objects: Vec::new(),
        }
    }

    /// Parses an annotation file.
    pub fn parse_file(path: &Path) -> Result<Self, GridlabelError> {
        let xml = fs::read_to_string(path).map_err(GridlabelError::Io)?;
        Self::parse_str(&xml, path)
    }

    /// Parses annotation XML from a UTF-8 string.
    pub fn parse_str(xml: &str, path: &Path) -> Result<Self, GridlabelError> {
        let document = roxmltree::Document::parse(xml).map_err(|source| {
            GridlabelError::VocXmlParse {
                path: path.to_path_buf(),
                message: source.to_string(),
            }
        })?;

        let annotation = document.root_element();
        if annotation.tag_name().name() != "annotation" {
            return Err(GridlabelError::VocXmlParse {
                path: path.to_path_buf(),
                message: "missing <annotation> root element".to_string(),
            });
        }

        let filename = required_child_text(annotation, "filename", path, "<annotation>")?;
        let size = required_child_element(annotation, "size", path, "<annotation>")?;
        let width = parse_required_u32(size, "width", path, "<size>")?;
        let height = parse_required_u32(size, "height", path, "<size>")?;
        let depth = optional_child_text(size, "depth")
            .map(|raw| {
                raw.parse::<u32>().map_err(|_| GridlabelError::VocXmlParse {
                    path: path.to_path_buf(),
                    message: format!("invalid <depth> value '{raw}' in <size>; expected u32"),
                })
            })
            .transpose()?
            .unwrap_or(8);

        let segmented = optional_child_text(annotation, "segmented")
            .map(|raw| raw.trim() == "1")
            .unwrap_or(false);

        let mut objects = Vec::new();
        for object in annotation
            .children()
            .filter(|node| node.is_element() && node.tag_name().name() == "object")
        {
            let name = required_child_text(object, "name", path, "<object>")?;
            let bndbox = required_child_element(object, "bndbox", path, "<object>")?;

            objects.push(VocObject {
                name,
                xmin: parse_required_coord(bndbox, "xmin", path)?,
                ymin: parse_required_coord(bndbox, "ymin", path)?,
                xmax: parse_required_coord(bndbox, "xmax", path)?,
                ymax: parse_required_coord(bndbox, "ymax", path)?,
            });
        }

        Ok(Self {
            folder: optional_child_text(annotation, "folder").unwrap_or_default(),
            filename,
            path: optional_child_text(annotation, "path").unwrap_or_default(),
            database: child_element(annotation, "source")
                .and_then(|source| optional_child_text(source, "database"))
                .unwrap_or_else(|| "Unknown".to_string()),
            width,
            height,
            depth,
            segmented,
            objects,
        })
    }

    /// Renders the annotation as deterministic XML.
    pub fn render(&self) -> String {
        use std::fmt::Write as _;

        let mut xml = String::new();
        writeln!(xml, "<?xml version=\"1.0\" encoding=\"utf-8\"?>").expect("write to string");
        writeln!(xml, "<annotation>").expect("write to string");
        writeln!(xml, "  <folder>{}</folder>", xml_escape(&self.folder)).expect("write to string");
        writeln!(xml, "  <filename>{}</filename>", xml_escape(&self.filename))
            .expect("write to string");
        writeln!(xml, "  <path>{}</path>", xml_escape(&self.path)).expect("write to string");
        writeln!(xml, "  <source>").expect("write to string");
        writeln!(xml, "    <database>{}</database>", xml_escape(&self.database))
            .expect("write to string");
        writeln!(xml, "  </source>").expect("write to string");
        writeln!(xml, "  <size>").expect("write to string");
        writeln!(xml, "    <width>{}</width>", self.width).expect("write to string");
        writeln!(xml, "    <height>{}</height>", self.height).expect("write to string");
        writeln!(xml, "    <depth>{}</depth>", self.depth).expect("write to string");
        writeln!(xml, "  </size>").expect("write to string");
        writeln!(xml, "  <segmented>{}</segmented>", u8::from(self.segmented))
            .expect("write to string");

        for object in &self.objects {
            writeln!(xml, "  <object>").expect("write to string");
            writeln!(xml, "    <name>{}</name>", xml_escape(&object.name)).expect("write to string");
            writeln!(xml, "    <bndbox>").expect("write to string");
            writeln!(xml, "      <xmin>{}</xmin>", object.xmin).expect("write to string");
            writeln!(xml, "      <ymin>{}</ymin>", object.ymin).expect("write to string");
            writeln!(xml, "      <xmax>{}</xmax>", object.xmax).expect("write to string");
            writeln!(xml, "      <ymax>{}</ymax>", object.ymax).expect("write to string");
            writeln!(xml, "    </bndbox>").expect("write to string");
            writeln!(xml, "  </object>").expect("write to string");
        }

        writeln!(xml, "</annotation>").expect("write to string");
        xml
    }

    /// Writes the rendered annotation to disk.
    pub fn write_file(&self, path: &Path) -> Result<(), GridlabelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| GridlabelError::VocWrite {
                path: path.to_path_buf(),
                message: format!("cannot create {}: {source}", parent.display()),
            })?;
        }
        fs::write(path, self.render()).map_err(|source| GridlabelError::VocWrite {
            path: path.to_path_buf(),
            message: source.to_string(),
        })
    }
}

/// Probes image dimensions from file headers without decoding pixels.
///
/// Returns `None` when the file is absent or not a readable raster.
pub fn probe_dimensions(path: &Path) -> Option<(u32, u32)> {
    let size = imagesize::size(path).ok()?;
    Some((size.width as u32, size.height as u32))
}

fn required_child_element<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<Node<'a, 'input>, GridlabelError> {
    child_element(node, tag).ok_or_else(|| GridlabelError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn required_child_text(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<String, GridlabelError> {
    optional_child_text(node, tag).ok_or_else(|| GridlabelError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn parse_required_u32(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<u32, GridlabelError> {
    let raw = required_child_text(node, tag, path, context)?;
    raw.parse::<u32>().map_err(|_| GridlabelError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("invalid <{tag}> value '{raw}' in {context}; expected u32"),
    })
}

/// Coordinates are integers, but some annotation tools emit floats;
/// those are rounded rather than rejected.
fn parse_required_coord(node: Node<'_, '_>, tag: &str, path: &Path) -> Result<i64, GridlabelError> {
    let raw = required_child_text(node, tag, path, "<bndbox>")?;
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(value);
    }
    raw.parse::<f64>()
        .map(|value| value.round() as i64)
        .map_err(|_| GridlabelError::VocXmlParse {
            path: path.to_path_buf(),
            message: format!("invalid <{tag}> value '{raw}' in <bndbox>; expected number"),
        })
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == tag)
}

fn optional_child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    child_element(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
