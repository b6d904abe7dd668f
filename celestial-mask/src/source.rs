//! Tile readers and directory discovery.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MaskError, MaskResult};
use crate::projection::Projection;
use crate::tile::Raster;

const TILE_EXTENSIONS: [&str; 3] = ["fits", "fit", "fts"];

/// What a reader reports about an opened tile before its pixels are read.
pub struct TileMetadata {
    pub nx: usize,
    pub ny: usize,
    pub projection: Box<dyn Projection>,
}

impl fmt::Debug for TileMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileMetadata")
            .field("nx", &self.nx)
            .field("ny", &self.ny)
            .finish_non_exhaustive()
    }
}

/// An open tile file. Dropping it closes the file.
pub trait OpenTile {
    fn metadata(&self) -> MaskResult<TileMetadata>;

    /// Reads the full raster; `nx`/`ny` must match the metadata.
    fn raster(&mut self, nx: usize, ny: usize) -> MaskResult<Raster>;
}

/// Opens tile files. Shared across loader threads.
pub trait TileSource: Send + Sync {
    fn open(&self, path: &Path) -> MaskResult<Box<dyn OpenTile>>;
}

/// True for `.fits`, `.fit` and `.fts`, optionally followed by `.gz`, in any case.
pub fn is_tile_file_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    let body = lower.strip_suffix(".gz").unwrap_or(&lower);
    match body.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && TILE_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Lists the tile files directly inside `dir`, sorted by file name.
pub fn find_tile_files(dir: &Path) -> MaskResult<Vec<PathBuf>> {
    let directory_error = |source| MaskError::Directory {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(directory_error)? {
        let entry = entry.map_err(directory_error)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_tile_file_name);
        if matches {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
