#![allow(dead_code)]

use std::fs;
use std::path::Path;

use gridlabel::config::PipelineConfig;
use gridlabel::voc::{VocAnnotation, VocObject};

/// Minimal 24-bit BMP bytes: enough header for dimension probing and a
/// zeroed pixel array the crop emitter can decode.
pub fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    let row_stride = (width * 3).div_ceil(4) * 4;
    let pixel_array_size = row_stride * height;
    let file_size = 54 + pixel_array_size;

    let mut bytes = Vec::with_capacity(file_size as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_size.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&54u32.to_le_bytes());

    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.resize(file_size as usize, 0);
    bytes
}

pub fn write_bmp(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bmp_bytes(width, height)).expect("write bmp file");
}

/// A pipeline config rooted at the temp dir, photographing in BMP so the
/// fixtures stay tiny.
pub fn test_config(base: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::rooted(base);
    config.image_extension = "bmp".to_string();
    config
}

/// Writes the master ledger CSV from raw positional rows.
pub fn write_ledger(config: &PipelineConfig, rows: &[String]) {
    fs::write(config.records_csv(), rows.join("\n")).expect("write ledger csv");
}

/// One ledger row: core, slide, grid, five filler columns, genus, species.
pub fn ledger_row(core: &str, slide: &str, grid_no: u32, genus: &str, species: &str) -> String {
    format!("{core},{slide},{grid_no},,,,,,{genus},{species}")
}

/// Writes a grid photograph into the mirrored image tree.
pub fn write_grid_image(config: &PipelineConfig, folder: &str, stem: &str, width: u32, height: u32) {
    let path = config
        .grid_images()
        .join(folder)
        .join(format!("{stem}.{}", config.image_extension));
    write_bmp(&path, width, height);
}

/// Writes a placeholder annotation into one annotation set, with every
/// object labeled `Ostracods` the way the pseudo tree has them.
pub fn write_pseudo_annotation(
    config: &PipelineConfig,
    set: &str,
    folder: &str,
    stem: &str,
    width: u32,
    height: u32,
    boxes: &[(i64, i64, i64, i64)],
) {
    let image_file = format!("{stem}.{}", config.image_extension);
    let image_path = config
        .grid_images()
        .join(folder)
        .join(&image_file)
        .display()
        .to_string();

    let mut annotation = VocAnnotation::empty(folder, &image_file, &image_path, width, height);
    for &(xmin, ymin, xmax, ymax) in boxes {
        annotation
            .objects
            .push(VocObject::new("Ostracods", xmin, ymin, xmax, ymax));
    }

    let path = config
        .pascal_dir(set)
        .join(folder)
        .join(format!("{stem}.xml"));
    annotation.write_file(&path).expect("write annotation");
}

/// Writes a resolved annotation with every object carrying `label`.
#[allow(clippy::too_many_arguments)]
pub fn write_labeled_annotation(
    config: &PipelineConfig,
    set: &str,
    folder: &str,
    stem: &str,
    label: &str,
    width: u32,
    height: u32,
    boxes: &[(i64, i64, i64, i64)],
) {
    let image_file = format!("{stem}.{}", config.image_extension);
    let image_path = config
        .grid_images()
        .join(folder)
        .join(&image_file)
        .display()
        .to_string();

    let mut annotation = VocAnnotation::empty(folder, &image_file, &image_path, width, height);
    for &(xmin, ymin, xmax, ymax) in boxes {
        annotation
            .objects
            .push(VocObject::new(label, xmin, ymin, xmax, ymax));
    }

    let path = config
        .pascal_dir(set)
        .join(folder)
        .join(format!("{stem}.xml"));
    annotation.write_file(&path).expect("write annotation");
}

/// Reads one annotation back from an annotation set.
pub fn read_annotation(config: &PipelineConfig, set: &str, folder: &str, stem: &str) -> VocAnnotation {
    let path = config
        .pascal_dir(set)
        .join(folder)
        .join(format!("{stem}.xml"));
    VocAnnotation::parse_file(&path).expect("parse annotation")
}

/// Raw bytes of one annotation file, for byte-identity assertions.
pub fn annotation_bytes(config: &PipelineConfig, set: &str, folder: &str, stem: &str) -> Vec<u8> {
    let path = config
        .pascal_dir(set)
        .join(folder)
        .join(format!("{stem}.xml"));
    fs::read(&path).expect("read annotation bytes")
}

pub fn annotation_exists(config: &PipelineConfig, set: &str, folder: &str, stem: &str) -> bool {
    config
        .pascal_dir(set)
        .join(folder)
        .join(format!("{stem}.xml"))
        .is_file()
}
