use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MaskError, MaskResult};
use crate::locator::DEFAULT_MAX_ITERATIONS;

/// How much a catalog reports about individual queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// No per-query logging.
    Quiet,
    /// Per-query verdict at debug level.
    #[default]
    Summary,
    /// Every tile is scanned and reported, even after a clear tile is found.
    Detailed,
}

/// Catalog settings. Every field has a default, so an empty JSON object is
/// a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Largest accepted disagreement, in degrees, between the position
    /// encoded in a file name and the one measured from the tile.
    pub name_tolerance_deg: f64,
    pub max_locate_iterations: usize,
    /// Upgrade legacy file names once their extent has been measured.
    pub rename_legacy_files: bool,
    pub parallel_load: bool,
    pub diagnostics: DiagnosticLevel,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            name_tolerance_deg: 0.1,
            max_locate_iterations: DEFAULT_MAX_ITERATIONS,
            rename_legacy_files: true,
            parallel_load: true,
            diagnostics: DiagnosticLevel::default(),
        }
    }
}

impl MaskConfig {
    pub fn from_json_str(json: &str) -> MaskResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MaskError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> MaskResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| MaskError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> MaskResult<()> {
        if !self.name_tolerance_deg.is_finite() || self.name_tolerance_deg < 0.0 {
            return Err(MaskError::config(format!(
                "name_tolerance_deg must be a non-negative number, got {}",
                self.name_tolerance_deg
            )));
        }
        if self.max_locate_iterations == 0 {
            return Err(MaskError::config("max_locate_iterations must be at least 1"));
        }
        Ok(())
    }
}
