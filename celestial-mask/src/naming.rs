//! Tile file naming convention.
//!
//! Mask tiles carry their nominal position (and, once measured, their angular
//! extent) in the file name so a catalog build can reject far-away tiles
//! without opening them:
//!
//! ```text
//! <prefix>_<decRange>_<raRange>_<dec>_<ra>.<ext>[.gz]   full form
//! <prefix>_<dec>_<ra>.<ext>[.gz]                         legacy form
//! ```
//!
//! All values are decimal degrees. Legacy names are upgraded to the full form
//! by [`upgrade_file_name`] once a reader has measured the extent.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MaskError, MaskResult};

/// Angular size of a tile in RA and Dec degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub ra: f64,
    pub dec: f64,
}

/// Everything a tile file name says about the tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileName {
    pub prefix: String,
    /// Extension without the leading dot, including any `.gz` suffix.
    pub extension: String,
    pub center_ra: f64,
    pub center_dec: f64,
    pub extent: Option<Extent>,
}

impl TileName {
    pub fn decode(name: &str) -> MaskResult<Self> {
        let (stem, extension) = split_extension(name)
            .ok_or_else(|| MaskError::naming_mismatch(name, "missing file extension"))?;

        let tokens: Vec<&str> = stem.split('_').collect();
        let numeric: Vec<f64> = tokens
            .iter()
            .rev()
            .map_while(|token| parse_field(token))
            .collect();

        if numeric.len() == tokens.len() {
            return Err(MaskError::naming_mismatch(
                name,
                "no prefix before the numeric fields",
            ));
        }

        // `numeric` runs right-to-left: ra, dec, raRange, decRange.
        let extent = match numeric.len() {
            2 => None,
            4 => Some(Extent {
                ra: numeric[2].abs(),
                dec: numeric[3].abs(),
            }),
            n => {
                return Err(MaskError::naming_mismatch(
                    name,
                    format!("expected 2 or 4 numeric fields, found {}", n),
                ))
            }
        };

        let prefix = tokens[..tokens.len() - numeric.len()].join("_");

        Ok(Self {
            prefix,
            extension: extension.to_string(),
            center_ra: numeric[0],
            center_dec: numeric[1],
            extent,
        })
    }

    pub fn encode(&self) -> String {
        match self.extent {
            Some(extent) => encode_name(
                &self.prefix,
                &self.extension,
                self.center_ra,
                self.center_dec,
                extent.ra,
                extent.dec,
            ),
            None => format!(
                "{}_{}_{}.{}",
                self.prefix, self.center_dec, self.center_ra, self.extension
            ),
        }
    }

    pub fn has_extent(&self) -> bool {
        self.extent.is_some()
    }

    pub fn with_extent(&self, ra_range: f64, dec_range: f64) -> Self {
        Self {
            extent: Some(Extent {
                ra: ra_range.abs(),
                dec: dec_range.abs(),
            }),
            ..self.clone()
        }
    }
}

/// Renders the full four-number form. Ranges are always written as positive
/// magnitudes.
pub fn encode_name(
    prefix: &str,
    extension: &str,
    ra: f64,
    dec: f64,
    ra_range: f64,
    dec_range: f64,
) -> String {
    format!(
        "{}_{}_{}_{}_{}.{}",
        prefix,
        dec_range.abs(),
        ra_range.abs(),
        dec,
        ra,
        extension
    )
}

/// Renames a legacy tile file so its name records the measured extent.
///
/// Returns the new path. The caller decides whether a failure matters; the
/// catalog treats it as a warning.
pub fn upgrade_file_name(
    path: &Path,
    name: &TileName,
    ra_range: f64,
    dec_range: f64,
) -> MaskResult<PathBuf> {
    let upgraded = name.with_extent(ra_range, dec_range).encode();
    let target = path.with_file_name(&upgraded);

    if target.exists() {
        return Err(MaskError::io(
            &target,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "upgraded tile name already exists",
            ),
        ));
    }

    fs::rename(path, &target).map_err(|e| MaskError::io(path, e))?;
    Ok(target)
}

fn split_extension(name: &str) -> Option<(&str, &str)> {
    let lower = name.to_ascii_lowercase();
    let body_len = if lower.ends_with(".gz") {
        name.len() - 3
    } else {
        name.len()
    };
    let dot = name[..body_len].rfind('.')?;
    if dot + 1 == body_len {
        return None;
    }
    Some((&name[..dot], &name[dot + 1..]))
}

fn parse_field(token: &str) -> Option<f64> {
    if token.is_empty() {
        return None;
    }
    // Rust's float parser accepts "inf" and "NaN"; those are prefixes, not fields.
    if !token
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}
