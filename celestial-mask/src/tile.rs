//! In-memory mask tiles.
//!
//! A [`Tile`] owns its raster and its projection outright. Everything about
//! its position on the sky is measured from the projection itself
//! ([`Footprint::measure`]); the values encoded in the file name are only used
//! to skip files before they are opened.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MaskError, MaskResult};
use crate::geometry::SkyRect;
use crate::projection::{wrap_ra_delta, PixelCoord, Projection, SkyCoord};

/// Integer mask raster, row-major with `x` (NAXIS1) varying fastest.
/// Accessors take 1-based FITS pixel indices.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    nx: usize,
    ny: usize,
    data: Vec<i32>,
}

impl Raster {
    pub fn new(nx: usize, ny: usize, data: Vec<i32>) -> MaskResult<Self> {
        if nx == 0 || ny == 0 {
            return Err(MaskError::fits(format!(
                "raster dimensions must be positive, got {}x{}",
                nx, ny
            )));
        }
        if data.len() != nx * ny {
            return Err(MaskError::fits(format!(
                "raster holds {} values, expected {}x{} = {}",
                data.len(),
                nx,
                ny,
                nx * ny
            )));
        }
        Ok(Self { nx, ny, data })
    }

    pub fn zeros(nx: usize, ny: usize) -> MaskResult<Self> {
        Self::new(nx, ny, vec![0; nx * ny])
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    #[inline]
    pub fn data(&self) -> &[i32] {
        &self.data
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> Option<usize> {
        if x == 0 || y == 0 || x > self.nx || y > self.ny {
            return None;
        }
        Some((y - 1) * self.nx + (x - 1))
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<i32> {
        self.index(x, y).map(|i| self.data[i])
    }

    /// Sets a pixel; returns false when `(x, y)` is outside the raster.
    pub fn set(&mut self, x: usize, y: usize, value: i32) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn is_contaminated(&self, x: usize, y: usize) -> bool {
        self.get(x, y).is_some_and(|v| v != 0)
    }

    pub fn count_contaminated(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("nx", &self.nx)
            .field("ny", &self.ny)
            .field("contaminated", &self.count_contaminated())
            .finish()
    }
}

/// True sky position of one pixel and the signed angular size of a pixel
/// step along each axis, measured at its edge midpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalScale {
    pub center: SkyCoord,
    /// RA degrees per +1 step in x.
    pub d_ra: f64,
    /// Dec degrees per +1 step in y.
    pub d_dec: f64,
}

/// Evaluates the projection at the pixel center and its four edge midpoints.
pub fn local_scale(projection: &dyn Projection, pixel: PixelCoord) -> MaskResult<LocalScale> {
    let (x, y) = (pixel.x(), pixel.y());
    let points = [
        pixel,
        PixelCoord::new(x - 0.5, y),
        PixelCoord::new(x + 0.5, y),
        PixelCoord::new(x, y - 0.5),
        PixelCoord::new(x, y + 0.5),
    ];
    let sky = collect_batch(projection, &points)?;

    let d_ra = wrap_ra_delta(sky[2].ra() - sky[1].ra());
    let d_dec = sky[4].dec() - sky[3].dec();
    if d_ra == 0.0 || d_dec == 0.0 || !d_ra.is_finite() || !d_dec.is_finite() {
        return Err(MaskError::projection(format!(
            "degenerate pixel scale at ({}, {}): dRA = {}, dDec = {}",
            x, y, d_ra, d_dec
        )));
    }

    Ok(LocalScale {
        center: sky[0],
        d_ra,
        d_dec,
    })
}

fn collect_batch(projection: &dyn Projection, points: &[PixelCoord]) -> MaskResult<Vec<SkyCoord>> {
    let results = projection.pixel_to_sky(points);
    if results.len() != points.len() {
        return Err(MaskError::projection(format!(
            "projection returned {} positions for {} pixels",
            results.len(),
            points.len()
        )));
    }
    results.into_iter().collect()
}

/// Where a tile sits on the sky, measured from its projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub center: SkyCoord,
    /// Average signed RA degrees per pixel along x.
    pub delta_ra: f64,
    /// Average signed Dec degrees per pixel along y.
    pub delta_dec: f64,
    /// Full RA span covered by the tile's outer pixel edges.
    pub ra_extent: f64,
    /// Full Dec span covered by the tile's outer pixel edges.
    pub dec_extent: f64,
}

impl Footprint {
    pub fn measure(projection: &dyn Projection, nx: usize, ny: usize) -> MaskResult<Self> {
        if nx == 0 || ny == 0 {
            return Err(MaskError::fits(format!(
                "tile dimensions must be positive, got {}x{}",
                nx, ny
            )));
        }

        let (xc, yc) = center_pixel(nx, ny);
        let (x0, x1) = (0.5, nx as f64 + 0.5);
        let (y0, y1) = (0.5, ny as f64 + 0.5);
        let points = [
            PixelCoord::new(xc, yc),
            PixelCoord::new(x0, yc),
            PixelCoord::new(x1, yc),
            PixelCoord::new(xc, y0),
            PixelCoord::new(xc, y1),
            PixelCoord::new(x0, y0),
            PixelCoord::new(x1, y0),
            PixelCoord::new(x0, y1),
            PixelCoord::new(x1, y1),
        ];
        let sky = collect_batch(projection, &points)?;
        let center = sky[0];

        let delta_ra = wrap_ra_delta(sky[2].ra() - sky[1].ra()) / nx as f64;
        let delta_dec = (sky[4].dec() - sky[3].dec()) / ny as f64;
        if delta_ra == 0.0 || delta_dec == 0.0 || !delta_ra.is_finite() || !delta_dec.is_finite()
        {
            return Err(MaskError::projection(format!(
                "tile has a degenerate pixel scale (dRA = {}, dDec = {})",
                delta_ra, delta_dec
            )));
        }

        let (mut ra_lo, mut ra_hi) = (0.0f64, 0.0f64);
        let (mut dec_lo, mut dec_hi) = (center.dec(), center.dec());
        for s in &sky[1..] {
            let offset = wrap_ra_delta(s.ra() - center.ra());
            ra_lo = ra_lo.min(offset);
            ra_hi = ra_hi.max(offset);
            dec_lo = dec_lo.min(s.dec());
            dec_hi = dec_hi.max(s.dec());
        }

        Ok(Self {
            center,
            delta_ra,
            delta_dec,
            ra_extent: ra_hi - ra_lo,
            dec_extent: dec_hi - dec_lo,
        })
    }

    pub fn rect(&self) -> SkyRect {
        SkyRect::new(
            self.center.ra(),
            self.center.dec(),
            self.ra_extent,
            self.dec_extent,
        )
    }
}

/// Geometric center of an `nx` x `ny` raster in 1-based pixel coordinates.
#[inline]
pub fn center_pixel(nx: usize, ny: usize) -> (f64, f64) {
    ((nx as f64 + 1.0) / 2.0, (ny as f64 + 1.0) / 2.0)
}

/// A loaded mask tile. Immutable once built.
#[derive(Debug)]
pub struct Tile {
    path: PathBuf,
    footprint: Footprint,
    projection: Box<dyn Projection>,
    raster: Raster,
}

impl Tile {
    pub fn new(
        path: impl Into<PathBuf>,
        projection: Box<dyn Projection>,
        raster: Raster,
    ) -> MaskResult<Self> {
        let footprint = Footprint::measure(projection.as_ref(), raster.nx(), raster.ny())?;
        Ok(Self {
            path: path.into(),
            footprint,
            projection,
            raster,
        })
    }

    /// Builds a tile from a footprint that was already measured for this
    /// projection and these dimensions.
    pub fn with_footprint(
        path: impl Into<PathBuf>,
        footprint: Footprint,
        projection: Box<dyn Projection>,
        raster: Raster,
    ) -> Self {
        Self {
            path: path.into(),
            footprint,
            projection,
            raster,
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.raster.nx()
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.raster.ny()
    }

    #[inline]
    pub fn center(&self) -> SkyCoord {
        self.footprint.center
    }

    #[inline]
    pub fn delta_ra(&self) -> f64 {
        self.footprint.delta_ra
    }

    #[inline]
    pub fn delta_dec(&self) -> f64 {
        self.footprint.delta_dec
    }

    #[inline]
    pub fn footprint(&self) -> &Footprint {
        &self.footprint
    }

    #[inline]
    pub fn projection(&self) -> &dyn Projection {
        self.projection.as_ref()
    }

    #[inline]
    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    #[inline]
    pub fn center_pixel(&self) -> (f64, f64) {
        center_pixel(self.nx(), self.ny())
    }
}
