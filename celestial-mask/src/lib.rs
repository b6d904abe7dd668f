//! Sky contamination masks built from tiled FITS images.
//!
//! A mask tile is a 2-D integer image with a celestial WCS; a nonzero pixel
//! marks contaminated sky (bright-star halos, satellite trails, bad CCD
//! regions). A [`MaskCatalog`] loads the tiles of a directory that overlap a
//! field and answers whether a small disc of sky is usable.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`catalog`] | [`MaskCatalog`]: directory scan, tile selection, queries, diagnostics |
//! | [`query`] | Per-tile disc scan and any-clear-wins aggregation |
//! | [`locator`] | Iterative sky -> pixel search using only the forward projection |
//! | [`naming`] | `<prefix>[_<decRange>_<raRange>]_<dec>_<ra>.<ext>` file names |
//! | [`geometry`] | Conservative tile/field overlap, point-to-box distance |
//! | [`projection`] | TAN (gnomonic) WCS with optional SIP distortion |
//! | [`tile`] | Rasters, footprints, local pixel scale |
//! | [`fits`] | Primary-HDU FITS reader and writer, gzip aware |
//! | [`source`] | Tile reader traits and directory discovery |
//! | [`config`] | [`MaskConfig`] with JSON loading |
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::Path;
//! use celestial_mask::{MaskCatalog, MaskConfig};
//!
//! let mut catalog = MaskCatalog::new(MaskConfig::default());
//! let report = catalog.initialise(Path::new("masks/"), 150.0, -30.0, 0.5)?;
//! for warning in &report.warnings {
//!     eprintln!("{warning}");
//! }
//!
//! let usable = catalog.check_use_for_sky(150.01, -29.98, 3.0 / 3600.0)?;
//! ```
//!
//! All angles are decimal degrees. Pixel indices are 1-based, FITS style.
//!
//! # Features
//!
//! - **`cli`**: builds the `mask-check` binary for inspecting tile
//!   directories and running queries from the command line.

pub mod catalog;
pub mod config;
pub mod error;
pub mod fits;
pub mod geometry;
pub mod locator;
pub mod naming;
pub mod projection;
pub mod query;
pub mod source;
pub mod tile;

pub use catalog::{CoordinateRange, InitReport, MaskCatalog};
pub use config::{DiagnosticLevel, MaskConfig};
pub use error::{MaskError, MaskResult};
pub use fits::{write_mask_fits, FitsTileSource};
pub use locator::{locate, Location, PixelIndex};
pub use naming::TileName;
pub use projection::{KeywordMap, PixelCoord, Projection, SkyCoord, TanProjection};
pub use query::{Assessment, TileVerdict};
pub use source::{find_tile_files, OpenTile, TileMetadata, TileSource};
pub use tile::{Raster, Tile};
