use std::path::PathBuf;

use thiserror::Error;

pub type MaskResult<T> = Result<T, MaskError>;

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("File name '{name}' does not follow the tile naming convention: {message}")]
    NamingMismatch { name: String, message: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot enumerate tile directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid FITS data: {message}")]
    Fits { message: String },

    #[error("Missing required WCS keyword: {keyword}")]
    MissingKeyword { keyword: String },

    #[error("Invalid WCS keyword '{keyword}': {message}")]
    InvalidKeyword { keyword: String, message: String },

    #[error("Projection error: {message}")]
    Projection { message: String },

    #[error("Invalid tile {path:?}: {message}")]
    InvalidTile { path: PathBuf, message: String },

    #[error("Position ({ra:.6}, {dec:.6}) lies outside the tile")]
    OutsideTile { ra: f64, dec: f64 },

    #[error("Pixel search did not converge: {message}")]
    Convergence { message: String },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Position ({ra:.6}, {dec:.6}) is outside all loaded mask tiles")]
    NoCoverage { ra: f64, dec: f64 },

    #[error("Mask catalog has not been initialised")]
    NotInitialised,

    #[error("Mask catalog has already been initialised")]
    AlreadyInitialised,

    #[error("No mask tiles in {path:?} overlap the field at ({ra:.4}, {dec:.4}) radius {radius:.4} deg")]
    NoTiles {
        path: PathBuf,
        ra: f64,
        dec: f64,
        radius: f64,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl MaskError {
    pub fn naming_mismatch(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NamingMismatch {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn fits(message: impl Into<String>) -> Self {
        Self::Fits {
            message: message.into(),
        }
    }

    pub fn missing_keyword(keyword: impl Into<String>) -> Self {
        Self::MissingKeyword {
            keyword: keyword.into(),
        }
    }

    pub fn invalid_keyword(keyword: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKeyword {
            keyword: keyword.into(),
            message: message.into(),
        }
    }

    pub fn projection(message: impl Into<String>) -> Self {
        Self::Projection {
            message: message.into(),
        }
    }

    pub fn invalid_tile(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidTile {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn convergence(message: impl Into<String>) -> Self {
        Self::Convergence {
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for the routine "target is beyond this tile" outcome of a pixel search.
    pub fn is_outside(&self) -> bool {
        matches!(self, Self::OutsideTile { .. })
    }
}
