//! The set of mask tiles relevant to one field, and queries against it.
//!
//! Build a catalog with [`MaskCatalog::initialise`], which scans a directory
//! of tile files and keeps those overlapping the field, then ask
//! [`MaskCatalog::check_use_for_sky`] whether a sky disc is free of masked
//! pixels. Queries take `&self` and can run concurrently.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::config::MaskConfig;
use crate::error::{MaskError, MaskResult};
use crate::fits::FitsTileSource;
use crate::geometry::{rect_overlaps_disc, SkyDisc, SkyRect};
use crate::naming::{upgrade_file_name, TileName};
use crate::projection::wrap_ra_delta;
use crate::query::{assess_tiles, Assessment};
use crate::source::{find_tile_files, TileSource};
use crate::tile::{Footprint, Tile};

/// Summary of a catalog build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitReport {
    /// Files in the directory with a tile extension.
    pub candidates: usize,
    pub tiles_loaded: usize,
    /// Candidates that were not loaded: bad names and tiles off the field.
    pub skipped: usize,
    /// New paths of legacy files that were renamed.
    pub renamed: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Bounds of every position queried since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoordinateRange {
    count: u64,
    ra_min: f64,
    ra_max: f64,
    dec_min: f64,
    dec_max: f64,
}

impl CoordinateRange {
    pub fn include(&mut self, ra: f64, dec: f64) {
        if self.count == 0 {
            self.ra_min = ra;
            self.ra_max = ra;
            self.dec_min = dec;
            self.dec_max = dec;
        } else {
            self.ra_min = self.ra_min.min(ra);
            self.ra_max = self.ra_max.max(ra);
            self.dec_min = self.dec_min.min(dec);
            self.dec_max = self.dec_max.max(dec);
        }
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn ra_bounds(&self) -> Option<(f64, f64)> {
        (self.count > 0).then_some((self.ra_min, self.ra_max))
    }

    pub fn dec_bounds(&self) -> Option<(f64, f64)> {
        (self.count > 0).then_some((self.dec_min, self.dec_max))
    }
}

impl fmt::Display for CoordinateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            return write!(f, "no positions queried");
        }
        write!(
            f,
            "{} positions, RA [{:.6}, {:.6}], Dec [{:.6}, {:.6}]",
            self.count, self.ra_min, self.ra_max, self.dec_min, self.dec_max
        )
    }
}

/// What happened to one candidate file.
enum Candidate {
    Loaded {
        tile: Tile,
        renamed: Option<PathBuf>,
        warnings: Vec<String>,
    },
    Skipped {
        warnings: Vec<String>,
    },
}

/// Mask tiles covering one field.
pub struct MaskCatalog {
    config: MaskConfig,
    source: Box<dyn TileSource>,
    tiles: Vec<Tile>,
    warnings: Vec<String>,
    initialised: bool,
    range: Mutex<CoordinateRange>,
}

impl fmt::Debug for MaskCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskCatalog")
            .field("config", &self.config)
            .field("tiles", &self.tiles.len())
            .field("warnings", &self.warnings.len())
            .field("initialised", &self.initialised)
            .finish_non_exhaustive()
    }
}

impl Default for MaskCatalog {
    fn default() -> Self {
        Self::new(MaskConfig::default())
    }
}

impl MaskCatalog {
    /// An empty catalog reading FITS tiles.
    pub fn new(config: MaskConfig) -> Self {
        Self::with_source(config, Box::new(FitsTileSource))
    }

    pub fn with_source(config: MaskConfig, source: Box<dyn TileSource>) -> Self {
        Self {
            config,
            source,
            tiles: Vec::new(),
            warnings: Vec::new(),
            initialised: false,
            range: Mutex::new(CoordinateRange::default()),
        }
    }

    /// Loads every tile in `dir` that overlaps the field of `field_radius`
    /// degrees around `(field_ra, field_dec)`.
    ///
    /// Files with malformed names are skipped with a warning, and files whose
    /// name already records a footprint off the field are skipped without
    /// being opened. A relevant file that cannot be read fails the whole
    /// build, and the catalog stays uninitialised.
    ///
    /// # Errors
    /// [`MaskError::AlreadyInitialised`], [`MaskError::Directory`],
    /// [`MaskError::NoTiles`], or the read error of a relevant tile.
    pub fn initialise(
        &mut self,
        dir: &Path,
        field_ra: f64,
        field_dec: f64,
        field_radius: f64,
    ) -> MaskResult<InitReport> {
        if self.initialised {
            return Err(MaskError::AlreadyInitialised);
        }

        let paths = find_tile_files(dir)?;
        let field = SkyDisc::new(field_ra, field_dec, field_radius);
        debug!(
            dir = %dir.display(),
            candidates = paths.len(),
            ra = field_ra,
            dec = field_dec,
            radius = field_radius,
            "scanning mask tiles"
        );

        let source = self.source.as_ref();
        let config = &self.config;
        let outcomes: Vec<MaskResult<Candidate>> = if config.parallel_load {
            paths
                .par_iter()
                .map(|path| load_candidate(source, config, path, &field))
                .collect()
        } else {
            paths
                .iter()
                .map(|path| load_candidate(source, config, path, &field))
                .collect()
        };

        let mut report = InitReport {
            candidates: paths.len(),
            ..InitReport::default()
        };
        let mut tiles = Vec::new();
        for outcome in outcomes {
            match outcome? {
                Candidate::Loaded {
                    tile,
                    renamed,
                    warnings,
                } => {
                    report.warnings.extend(warnings);
                    report.renamed.extend(renamed);
                    tiles.push(tile);
                }
                Candidate::Skipped { warnings } => {
                    report.warnings.extend(warnings);
                    report.skipped += 1;
                }
            }
        }

        for warning in &report.warnings {
            warn!("{}", warning);
        }

        if tiles.is_empty() {
            return Err(MaskError::NoTiles {
                path: dir.to_path_buf(),
                ra: field_ra,
                dec: field_dec,
                radius: field_radius,
            });
        }

        report.tiles_loaded = tiles.len();
        info!(
            tiles = report.tiles_loaded,
            skipped = report.skipped,
            renamed = report.renamed.len(),
            warnings = report.warnings.len(),
            "mask catalog initialised"
        );

        self.tiles = tiles;
        self.warnings = report.warnings.clone();
        self.initialised = true;
        Ok(report)
    }

    /// True when no masked pixel lies within `radius` degrees of
    /// `(ra, dec)` in at least one tile covering that position.
    ///
    /// # Errors
    /// [`MaskError::NotInitialised`], [`MaskError::NoCoverage`] when no tile
    /// covers the position, or [`MaskError::Convergence`] from the pixel
    /// search.
    pub fn check_use_for_sky(&self, ra: f64, dec: f64, radius: f64) -> MaskResult<bool> {
        self.assess(ra, dec, radius).map(|a| a.clear)
    }

    /// Like [`check_use_for_sky`](Self::check_use_for_sky), with the
    /// per-tile verdicts.
    pub fn assess(&self, ra: f64, dec: f64, radius: f64) -> MaskResult<Assessment> {
        if !self.initialised {
            return Err(MaskError::NotInitialised);
        }

        self.range
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .include(ra, dec);

        assess_tiles(
            &self.tiles,
            ra,
            dec,
            radius,
            self.config.max_locate_iterations,
            self.config.diagnostics,
        )
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Warnings collected while initialising.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn config(&self) -> &MaskConfig {
        &self.config
    }

    pub fn coordinate_range(&self) -> CoordinateRange {
        *self.range.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset_coordinate_range(&self) {
        *self.range.lock().unwrap_or_else(PoisonError::into_inner) = CoordinateRange::default();
    }
}

fn load_candidate(
    source: &dyn TileSource,
    config: &MaskConfig,
    path: &Path,
    field: &SkyDisc,
) -> MaskResult<Candidate> {
    let mut warnings = Vec::new();

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        warnings.push(format!("skipping {}: file name is not UTF-8", path.display()));
        return Ok(Candidate::Skipped { warnings });
    };

    let name = match TileName::decode(file_name) {
        Ok(name) => name,
        Err(e) => {
            warnings.push(format!("skipping {}: {}", path.display(), e));
            return Ok(Candidate::Skipped { warnings });
        }
    };

    if let Some(extent) = name.extent {
        let named = SkyRect::new(name.center_ra, name.center_dec, extent.ra, extent.dec);
        if !rect_overlaps_disc(&named, field) {
            trace!(path = %path.display(), "tile name places it off the field");
            return Ok(Candidate::Skipped { warnings });
        }
    }

    let mut tile_file = source.open(path)?;
    let metadata = tile_file
        .metadata()
        .map_err(|e| describe_tile_error(path, e))?;
    let footprint = Footprint::measure(metadata.projection.as_ref(), metadata.nx, metadata.ny)
        .map_err(|e| describe_tile_error(path, e))?;

    if let Some(warning) = name_disagreement(file_name, &name, &footprint, config.name_tolerance_deg)
    {
        warnings.push(warning);
    }

    let mut tile_path = path.to_path_buf();
    let mut renamed = None;
    if !name.has_extent() && config.rename_legacy_files {
        match upgrade_file_name(path, &name, footprint.ra_extent, footprint.dec_extent) {
            Ok(new_path) => {
                debug!(from = %path.display(), to = %new_path.display(), "renamed legacy tile");
                tile_path = new_path.clone();
                renamed = Some(new_path);
            }
            Err(e) => warnings.push(format!("could not rename {}: {}", path.display(), e)),
        }
    }

    if !rect_overlaps_disc(&footprint.rect(), field) {
        trace!(path = %tile_path.display(), "tile footprint is off the field");
        return Ok(Candidate::Skipped { warnings });
    }

    let raster = tile_file.raster(metadata.nx, metadata.ny)?;
    debug!(
        path = %tile_path.display(),
        nx = metadata.nx,
        ny = metadata.ny,
        ra = footprint.center.ra(),
        dec = footprint.center.dec(),
        "loaded mask tile"
    );

    Ok(Candidate::Loaded {
        tile: Tile::with_footprint(tile_path, footprint, metadata.projection, raster),
        renamed,
        warnings,
    })
}

/// Compares the position (and extent, when present) encoded in a file name
/// with the measured footprint.
fn name_disagreement(
    file_name: &str,
    name: &TileName,
    footprint: &Footprint,
    tolerance: f64,
) -> Option<String> {
    let d_ra = wrap_ra_delta(name.center_ra - footprint.center.ra()).abs();
    let d_dec = (name.center_dec - footprint.center.dec()).abs();
    let mut worst = d_ra.max(d_dec);
    if let Some(extent) = name.extent {
        worst = worst
            .max((extent.ra - footprint.ra_extent).abs())
            .max((extent.dec - footprint.dec_extent).abs());
    }

    (worst > tolerance).then(|| {
        format!(
            "{}: name disagrees with the tile's WCS by {:.4} deg (measured center {}, extent {:.4} x {:.4})",
            file_name, worst, footprint.center, footprint.ra_extent, footprint.dec_extent
        )
    })
}

/// Gives format and projection errors the path of the tile they came from.
fn describe_tile_error(path: &Path, err: MaskError) -> MaskError {
    match err {
        MaskError::Fits { .. }
        | MaskError::MissingKeyword { .. }
        | MaskError::InvalidKeyword { .. }
        | MaskError::Projection { .. } => MaskError::invalid_tile(path, err.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::write_mask_fits;
    use crate::projection::KeywordMap;
    use crate::source::OpenTile;
    use crate::tile::Raster;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const ARCSEC: f64 = 1.0 / 3600.0;

    fn write_tile(dir: &Path, name: &str, ra: f64, dec: f64, flags: &[(usize, usize)]) -> PathBuf {
        let mut raster = Raster::zeros(10, 10).unwrap();
        for &(x, y) in flags {
            raster.set(x, y, 1);
        }
        let path = dir.join(name);
        write_mask_fits(&path, &raster, &KeywordMap::tan_tile(10, 10, ra, dec, ARCSEC), false)
            .unwrap();
        path
    }

    #[derive(Debug, Clone, Default)]
    struct CountingSource {
        opened: Arc<AtomicUsize>,
    }

    impl TileSource for CountingSource {
        fn open(&self, path: &Path) -> MaskResult<Box<dyn OpenTile>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            FitsTileSource.open(path)
        }
    }

    fn sequential() -> MaskConfig {
        MaskConfig {
            parallel_load: false,
            ..MaskConfig::default()
        }
    }

    #[test]
    fn test_coordinate_range() {
        let mut range = CoordinateRange::default();
        assert!(range.is_empty());
        assert_eq!(range.to_string(), "no positions queried");
        range.include(10.0, -5.0);
        range.include(12.0, -7.0);
        assert_eq!(range.count(), 2);
        assert_eq!(range.ra_bounds(), Some((10.0, 12.0)));
        assert_eq!(range.dec_bounds(), Some((-7.0, -5.0)));
        assert!(range.to_string().starts_with("2 positions"));
    }

    #[test]
    fn test_rename_failure_is_a_warning() {
        let scratch = TempDir::new().unwrap();
        write_tile(scratch.path(), "m_-30_150.fits", 150.0, -30.0, &[]);
        let mut first = MaskCatalog::new(sequential());
        let report = first.initialise(scratch.path(), 150.0, -30.0, 0.5).unwrap();
        let upgraded = report.renamed[0]
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        // The upgraded name is already taken in this directory.
        let dir = TempDir::new().unwrap();
        let legacy = write_tile(dir.path(), "m_-30_150.fits", 150.0, -30.0, &[]);
        let occupant = write_tile(dir.path(), &upgraded, 150.0, -30.0, &[]);

        let mut catalog = MaskCatalog::new(sequential());
        let report = catalog.initialise(dir.path(), 150.0, -30.0, 0.5).unwrap();
        assert!(report.renamed.is_empty());
        assert_eq!(report.tiles_loaded, 2);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("could not rename"));
        assert!(catalog.warnings()[0].contains("could not rename"));

        let paths: Vec<_> = catalog.tiles().iter().map(|t| t.path().to_path_buf()).collect();
        assert!(paths.contains(&legacy));
        assert!(paths.contains(&occupant));
        assert!(legacy.exists());
        assert!(catalog.check_use_for_sky(150.0, -30.0, 3.0 * ARCSEC).unwrap());
    }

    #[test]
    fn test_named_tile_off_field_is_never_opened() {
        let dir = TempDir::new().unwrap();
        write_tile(dir.path(), "m_0.003_0.003_-30_150.fits", 150.0, -30.0, &[]);
        write_tile(dir.path(), "m_0.003_0.003_40_10.fits", 10.0, 40.0, &[]);

        let source = CountingSource::default();
        let opened = Arc::clone(&source.opened);
        let mut catalog = MaskCatalog::with_source(sequential(), Box::new(source));
        let report = catalog.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap();

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(report.tiles_loaded, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_legacy_tile_off_field_is_renamed_and_skipped() {
        let dir = TempDir::new().unwrap();
        write_tile(dir.path(), "m_-30_150.fits", 150.0, -30.0, &[]);
        write_tile(dir.path(), "m_40_10.fits", 10.0, 40.0, &[]);

        let mut catalog = MaskCatalog::new(sequential());
        let report = catalog.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap();
        assert_eq!(report.tiles_loaded, 1);
        assert_eq!(report.renamed.len(), 2);
        assert!(!dir.path().join("m_40_10.fits").exists());
        assert!(catalog.tiles()[0]
            .path()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("_-30_150.fits"));
    }

    #[test]
    fn test_rename_disabled() {
        let dir = TempDir::new().unwrap();
        write_tile(dir.path(), "m_-30_150.fits", 150.0, -30.0, &[]);
        let config = MaskConfig {
            rename_legacy_files: false,
            ..sequential()
        };
        let mut catalog = MaskCatalog::new(config);
        let report = catalog.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap();
        assert!(report.renamed.is_empty());
        assert!(dir.path().join("m_-30_150.fits").exists());
    }

    #[test]
    fn test_name_disagreement_warns() {
        let dir = TempDir::new().unwrap();
        write_tile(dir.path(), "m_-29.5_150.fits", 150.0, -30.0, &[]);
        let mut catalog = MaskCatalog::new(sequential());
        let report = catalog.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap();
        assert_eq!(report.tiles_loaded, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("disagrees"));
        assert_eq!(catalog.warnings(), report.warnings.as_slice());
    }

    #[test]
    fn test_lifecycle_errors() {
        let dir = TempDir::new().unwrap();
        write_tile(dir.path(), "m_-30_150.fits", 150.0, -30.0, &[]);
        let mut catalog = MaskCatalog::new(sequential());

        assert!(matches!(
            catalog.check_use_for_sky(150.0, -30.0, ARCSEC),
            Err(MaskError::NotInitialised)
        ));
        catalog.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap();
        assert!(matches!(
            catalog.initialise(dir.path(), 150.0, -30.0, 0.1),
            Err(MaskError::AlreadyInitialised)
        ));
    }

    #[test]
    fn test_no_tiles_on_field() {
        let dir = TempDir::new().unwrap();
        write_tile(dir.path(), "m_0.003_0.003_40_10.fits", 10.0, 40.0, &[]);
        let mut catalog = MaskCatalog::new(sequential());
        let err = catalog.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap_err();
        assert!(matches!(err, MaskError::NoTiles { .. }));
        assert!(!catalog.is_initialised());
    }

    #[test]
    fn test_unreadable_relevant_tile_fails() {
        let dir = TempDir::new().unwrap();
        write_tile(dir.path(), "m_-30_150.fits", 150.0, -30.0, &[]);
        std::fs::write(dir.path().join("m_-30.001_150.fits"), b"not a fits file").unwrap();
        let mut catalog = MaskCatalog::new(sequential());
        let err = catalog.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap_err();
        assert!(matches!(err, MaskError::InvalidTile { .. }));
        assert!(!catalog.is_initialised());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let dir = TempDir::new().unwrap();
        for i in 0..6 {
            let dec = -30.0 + i as f64 * 0.001;
            write_tile(dir.path(), &format!("m_0.003_0.003_{}_150.fits", dec), 150.0, dec, &[]);
        }
        std::fs::write(dir.path().join("broken.fits"), b"").unwrap();

        let mut seq = MaskCatalog::new(sequential());
        let seq_report = seq.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap();
        let mut par = MaskCatalog::new(MaskConfig::default());
        let par_report = par.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap();

        assert_eq!(seq_report, par_report);
        let seq_paths: Vec<_> = seq.tiles().iter().map(|t| t.path().to_path_buf()).collect();
        let par_paths: Vec<_> = par.tiles().iter().map(|t| t.path().to_path_buf()).collect();
        assert_eq!(seq_paths, par_paths);
    }

    #[test]
    fn test_queries_update_coordinate_range() {
        let dir = TempDir::new().unwrap();
        write_tile(dir.path(), "m_-30_150.fits", 150.0, -30.0, &[(5, 5)]);
        let mut catalog = MaskCatalog::new(sequential());
        catalog.initialise(dir.path(), 150.0, -30.0, 0.1).unwrap();

        assert!(!catalog.check_use_for_sky(150.0, -30.0, 3.0 * ARCSEC).unwrap());
        assert!(catalog.check_use_for_sky(1.0, 1.0, ARCSEC).is_err());
        let range = catalog.coordinate_range();
        assert_eq!(range.count(), 2);
        assert_eq!(range.ra_bounds(), Some((1.0, 150.0)));

        catalog.reset_coordinate_range();
        assert!(catalog.coordinate_range().is_empty());
    }

    #[test]
    fn test_catalog_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MaskCatalog>();
    }
}
