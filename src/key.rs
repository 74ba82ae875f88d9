//! Canonical keys for grid photographs and annotation folders.
//!
//! Every component of the pipeline joins on these keys: the ledger is
//! indexed by `(core, slide)`, annotation files are named by the full
//! grid key, and crops inherit their names from it. Parsing is the only
//! place filename shapes are interpreted; everything downstream works
//! with the typed keys.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Lowest valid grid number on a slide.
pub const GRID_MIN: u32 = 1;
/// Highest valid grid number on a slide.
pub const GRID_MAX: u32 = 60;

/// Raised when a file or folder name does not match the expected shape.
///
/// Always non-fatal: the offending file is skipped and reported.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("'{name}' does not name a grid photograph: {reason}")]
pub struct KeyParseError {
    pub name: String,
    pub reason: String,
}

impl KeyParseError {
    fn new(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Identity of one photographed microscope grid cell.
///
/// Derived from stems of the form `<core>_<slide>_<mag>X_grid_<n>`, where
/// `<slide>` itself may be two underscore-joined tokens
/// (e.g. `HK14TLH1C_0_1_50X_grid_5` has slide `0_1`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GridKey {
    pub core: String,
    pub slide: String,
    /// The magnification token exactly as written (e.g. `50X`), kept so the
    /// original stem can be reconstructed.
    pub magnification: String,
    pub grid_no: u32,
}

impl GridKey {
    /// Parses a filename stem into a grid key.
    ///
    /// Accepts 5-token stems (single slide token) and 6-token stems
    /// (slide split across two tokens). Any other arrangement is a
    /// [`KeyParseError`].
    pub fn parse_stem(stem: &str) -> Result<Self, KeyParseError> {
        let tokens: Vec<&str> = stem.split('_').collect();

        if tokens.len() != 5 && tokens.len() != 6 {
            return Err(KeyParseError::new(
                stem,
                format!("expected 5 or 6 underscore-separated tokens, got {}", tokens.len()),
            ));
        }

        let grid_literal = tokens[tokens.len() - 2];
        if grid_literal != "grid" {
            return Err(KeyParseError::new(
                stem,
                format!("expected 'grid' before the grid number, got '{grid_literal}'"),
            ));
        }

        let raw_grid = tokens[tokens.len() - 1];
        let grid_no = raw_grid
            .parse::<u32>()
            .map_err(|_| KeyParseError::new(stem, format!("grid number '{raw_grid}' is not numeric")))?;

        let magnification = tokens[tokens.len() - 3];
        validate_magnification(stem, magnification)?;

        let slide = if tokens.len() == 5 {
            tokens[1].to_string()
        } else {
            format!("{}_{}", tokens[1], tokens[2])
        };

        Ok(Self {
            core: tokens[0].to_string(),
            slide,
            magnification: magnification.to_string(),
            grid_no,
        })
    }

    /// Parses a file path (annotation or image) into a grid key using its stem.
    pub fn parse_path(path: &Path) -> Result<Self, KeyParseError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| KeyParseError::new(&path.to_string_lossy(), "path has no UTF-8 stem"))?;
        Self::parse_stem(stem)
    }

    /// Reconstructs the filename stem this key was parsed from.
    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}_grid_{}",
            self.core, self.slide, self.magnification, self.grid_no
        )
    }

    /// The annotation folder this grid belongs to.
    pub fn folder(&self) -> FolderKey {
        FolderKey {
            core: self.core.clone(),
            slide: self.slide.clone(),
            magnification: self.magnification.clone(),
        }
    }

    /// Stem for the `k`-th validated specimen cropped from this grid.
    pub fn specimen_stem(&self, instance: usize) -> String {
        format!("{}_{}_{}_ind{}", self.core, self.slide, self.grid_no, instance)
    }

    /// Whether the grid number addresses a real grid cell.
    ///
    /// Grid 0 is a sentinel used for calibration shots and is never data.
    pub fn in_range(&self) -> bool {
        (GRID_MIN..=GRID_MAX).contains(&self.grid_no)
    }
}

impl fmt::Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stem())
    }
}

/// Identity of one annotation folder (`<core>_<slide>_<mag>X`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FolderKey {
    pub core: String,
    pub slide: String,
    pub magnification: String,
}

impl FolderKey {
    /// Parses an annotation folder name (a grid stem minus `_grid_<n>`).
    pub fn parse(name: &str) -> Result<Self, KeyParseError> {
        let tokens: Vec<&str> = name.split('_').collect();

        if tokens.len() != 3 && tokens.len() != 4 {
            return Err(KeyParseError::new(
                name,
                format!("expected 3 or 4 underscore-separated tokens, got {}", tokens.len()),
            ));
        }

        let magnification = tokens[tokens.len() - 1];
        validate_magnification(name, magnification)?;

        let slide = if tokens.len() == 3 {
            tokens[1].to_string()
        } else {
            format!("{}_{}", tokens[1], tokens[2])
        };

        Ok(Self {
            core: tokens[0].to_string(),
            slide,
            magnification: magnification.to_string(),
        })
    }

    /// The folder name on disk.
    pub fn name(&self) -> String {
        format!("{}_{}_{}", self.core, self.slide, self.magnification)
    }

    /// Lowercased `core_slide` join key for case-insensitive ledger matching.
    pub fn search_name(&self) -> String {
        format!("{}_{}", self.core, self.slide).to_lowercase()
    }

    /// Stem of grid `n` inside this folder.
    pub fn grid_stem(&self, grid_no: u32) -> String {
        format!("{}_grid_{}", self.name(), grid_no)
    }
}

impl fmt::Display for FolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn validate_magnification(name: &str, token: &str) -> Result<(), KeyParseError> {
    let valid = token.len() >= 2
        && token.ends_with(['X', 'x'])
        && token[..token.len() - 1]
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',');
    if valid {
        Ok(())
    } else {
        Err(KeyParseError::new(
            name,
            format!("'{token}' is not a magnification token"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_five_token_stem() {
        let key = GridKey::parse_stem("HKUV12_FD_50X_grid_1").expect("parse stem");
        assert_eq!(key.core, "HKUV12");
        assert_eq!(key.slide, "FD");
        assert_eq!(key.magnification, "50X");
        assert_eq!(key.grid_no, 1);
    }

    #[test]
    fn parse_six_token_stem_joins_slide() {
        let key = GridKey::parse_stem("HK14TLH1C_0_1_50X_grid_5").expect("parse stem");
        assert_eq!(key.core, "HK14TLH1C");
        assert_eq!(key.slide, "0_1");
        assert_eq!(key.magnification, "50X");
        assert_eq!(key.grid_no, 5);
    }

    #[test]
    fn stem_roundtrip() {
        for stem in ["HKUV12_FD_50X_grid_1", "HK14TLH1C_0_1_100X_grid_60"] {
            let key = GridKey::parse_stem(stem).expect("parse stem");
            assert_eq!(key.stem(), stem);
        }
    }

    #[test]
    fn parse_path_strips_directory_and_extension() {
        let path = Path::new("/data/pseudo_annotation/pascal_voc/HKUV12_FD_50X/HKUV12_FD_50X_grid_3.xml");
        let key = GridKey::parse_path(path).expect("parse path");
        assert_eq!(key.stem(), "HKUV12_FD_50X_grid_3");
        assert_eq!(key.grid_no, 3);
    }

    #[test]
    fn reject_wrong_token_count() {
        assert!(GridKey::parse_stem("HKUV12_grid_1").is_err());
        assert!(GridKey::parse_stem("a_b_c_d_50X_grid_1").is_err());
    }

    #[test]
    fn reject_non_numeric_grid() {
        assert!(GridKey::parse_stem("HKUV12_FD_50X_grid_one").is_err());
    }

    #[test]
    fn reject_missing_grid_literal() {
        assert!(GridKey::parse_stem("HKUV12_FD_50X_cell_1").is_err());
    }

    #[test]
    fn reject_bad_magnification() {
        assert!(GridKey::parse_stem("HKUV12_FD_fifty_grid_1").is_err());
    }

    #[test]
    fn grid_zero_is_out_of_range() {
        let key = GridKey::parse_stem("HKUV12_FD_50X_grid_0").expect("parse stem");
        assert!(!key.in_range());
        let key = GridKey::parse_stem("HKUV12_FD_50X_grid_61").expect("parse stem");
        assert!(!key.in_range());
        let key = GridKey::parse_stem("HKUV12_FD_50X_grid_60").expect("parse stem");
        assert!(key.in_range());
    }

    #[test]
    fn folder_parse_and_search_name() {
        let folder = FolderKey::parse("HK14TLH1C_0_1_50X").expect("parse folder");
        assert_eq!(folder.core, "HK14TLH1C");
        assert_eq!(folder.slide, "0_1");
        assert_eq!(folder.search_name(), "hk14tlh1c_0_1");
        assert_eq!(folder.grid_stem(7), "HK14TLH1C_0_1_50X_grid_7");
    }

    #[test]
    fn folder_matches_grid_key_folder() {
        let key = GridKey::parse_stem("HK14TLH1C_0_1_50X_grid_5").expect("parse stem");
        let folder = FolderKey::parse("HK14TLH1C_0_1_50X").expect("parse folder");
        assert_eq!(key.folder(), folder);
    }

    #[test]
    fn specimen_stem_uses_core_slide_grid() {
        let key = GridKey::parse_stem("HKUV12_FD_50X_grid_3").expect("parse stem");
        assert_eq!(key.specimen_stem(2), "HKUV12_FD_3_ind2");
    }
}
