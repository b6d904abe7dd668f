//! Sky -> pixel search within a single tile.
//!
//! Tile projections are only available in the forward direction, so the
//! containing pixel is found by fixed-point iteration: extrapolate linearly
//! from the current estimate, then re-measure the true position and local
//! scale at the trial pixel and repeat. Well-behaved tiles converge in one to
//! three steps.

use crate::error::{MaskError, MaskResult};
use crate::projection::{wrap_ra_delta, PixelCoord, SkyCoord};
use crate::tile::{local_scale, LocalScale, Tile};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Relative slack on the half-pixel tests, so a target lying exactly on a
/// shared pixel edge is accepted by the pixel it was first extrapolated to.
const HALF_PIXEL_SLACK: f64 = 1e-9;

/// 1-based pixel index within a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelIndex {
    pub x: usize,
    pub y: usize,
}

impl PixelIndex {
    #[inline]
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn to_coord(self) -> PixelCoord {
        PixelCoord::new(self.x as f64, self.y as f64)
    }
}

/// The pixel containing a target, together with the projection measurement
/// taken there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub pixel: PixelIndex,
    pub scale: LocalScale,
    pub iterations: usize,
}

#[derive(Debug, Clone, Copy)]
struct Estimate {
    pixel: (f64, f64),
    sky: SkyCoord,
    d_ra: f64,
    d_dec: f64,
    /// The two most recent trials, newest first.
    last: Option<Location>,
    before_last: Option<Location>,
}

#[derive(Debug)]
enum LocatorState {
    Searching(Estimate),
    Converged(Location),
    OutOfBounds,
    Stuck(String),
}

/// Iterative sky -> pixel search over one tile.
pub struct PixelLocator<'a> {
    tile: &'a Tile,
    target: SkyCoord,
    max_iterations: usize,
}

impl<'a> PixelLocator<'a> {
    pub fn new(tile: &'a Tile, target: SkyCoord, max_iterations: usize) -> Self {
        Self {
            tile,
            target,
            max_iterations,
        }
    }

    /// Runs the search to completion.
    ///
    /// # Errors
    /// [`MaskError::OutsideTile`] when the search pins against a tile edge,
    /// [`MaskError::Convergence`] when it exceeds the iteration bound, and any
    /// projection error raised on the way.
    pub fn run(self) -> MaskResult<Location> {
        if !self.target.ra().is_finite() || !self.target.dec().is_finite() {
            return Err(MaskError::convergence(format!(
                "target {} is not a finite position",
                self.target
            )));
        }

        let (xc, yc) = self.tile.center_pixel();
        let mut state = LocatorState::Searching(Estimate {
            pixel: (xc, yc),
            sky: self.tile.center(),
            d_ra: self.tile.delta_ra(),
            d_dec: self.tile.delta_dec(),
            last: None,
            before_last: None,
        });
        let mut iterations = 0;

        loop {
            state = match state {
                LocatorState::Searching(estimate) => {
                    if iterations >= self.max_iterations {
                        LocatorState::Stuck(format!(
                            "no convergence on {} after {} iterations",
                            self.target, iterations
                        ))
                    } else {
                        iterations += 1;
                        self.step(estimate, iterations)?
                    }
                }
                LocatorState::Converged(location) => return Ok(location),
                LocatorState::OutOfBounds => {
                    return Err(MaskError::OutsideTile {
                        ra: self.target.ra(),
                        dec: self.target.dec(),
                    })
                }
                LocatorState::Stuck(message) => return Err(MaskError::convergence(message)),
            };
        }
    }

    fn step(&self, estimate: Estimate, iteration: usize) -> MaskResult<LocatorState> {
        let raw_x = estimate.pixel.0 + wrap_ra_delta(self.target.ra() - estimate.sky.ra()) / estimate.d_ra;
        let raw_y = estimate.pixel.1 + (self.target.dec() - estimate.sky.dec()) / estimate.d_dec;
        let previous = estimate.last.map(|l| l.pixel);
        let (x, clamped_x) = snap_axis(raw_x, previous.map(|p| p.x), self.tile.nx());
        let (y, clamped_y) = snap_axis(raw_y, previous.map(|p| p.y), self.tile.ny());
        let trial = PixelIndex::new(x, y);

        // Measured from the edge pixel itself, the target is still more than
        // half a pixel beyond it.
        let pinned_x = clamped_x && previous.is_some_and(|p| p.x == x);
        let pinned_y = clamped_y && previous.is_some_and(|p| p.y == y);
        if pinned_x || pinned_y {
            return Ok(LocatorState::OutOfBounds);
        }

        if let Some(last) = estimate.last {
            // Both axes kept the last pixel, so the target is inside it up
            // to rounding.
            if last.pixel == trial {
                return Ok(LocatorState::Converged(Location {
                    iterations: iteration,
                    ..last
                }));
            }
            // Bouncing between neighbours: the target sits on their shared
            // edge and either pixel holds it.
            if let Some(earlier) = estimate.before_last {
                if earlier.pixel == trial && adjacent(last.pixel, earlier.pixel) {
                    let best = if self.excess(&last.scale) <= self.excess(&earlier.scale) {
                        last
                    } else {
                        earlier
                    };
                    return Ok(LocatorState::Converged(Location {
                        iterations: iteration,
                        ..best
                    }));
                }
            }
        }

        let scale = local_scale(self.tile.projection(), trial.to_coord())?;
        let off_ra = wrap_ra_delta(self.target.ra() - scale.center.ra());
        let off_dec = self.target.dec() - scale.center.dec();
        let location = Location {
            pixel: trial,
            scale,
            iterations: iteration,
        };

        if within_half_pixel(off_ra, scale.d_ra) && within_half_pixel(off_dec, scale.d_dec) {
            return Ok(LocatorState::Converged(location));
        }

        Ok(LocatorState::Searching(Estimate {
            pixel: (x as f64, y as f64),
            sky: scale.center,
            d_ra: scale.d_ra,
            d_dec: scale.d_dec,
            last: Some(location),
            before_last: estimate.last,
        }))
    }

    /// Largest offset of the target from a measured pixel center, in pixels.
    fn excess(&self, scale: &LocalScale) -> f64 {
        let off_ra = wrap_ra_delta(self.target.ra() - scale.center.ra()) / scale.d_ra;
        let off_dec = (self.target.dec() - scale.center.dec()) / scale.d_dec;
        off_ra.abs().max(off_dec.abs())
    }
}

#[inline]
fn within_half_pixel(offset: f64, pixel_size: f64) -> bool {
    offset.abs() <= pixel_size.abs() * 0.5 * (1.0 + HALF_PIXEL_SLACK)
}

#[inline]
fn adjacent(a: PixelIndex, b: PixelIndex) -> bool {
    a.x.abs_diff(b.x) <= 1 && a.y.abs_diff(b.y) <= 1
}

/// Keeps the current pixel on an axis where the extrapolation stays within
/// half a pixel of it, otherwise rounds and clamps.
fn snap_axis(raw: f64, current: Option<usize>, n: usize) -> (usize, bool) {
    if let Some(current) = current {
        if (raw - current as f64).abs() <= 0.5 * (1.0 + HALF_PIXEL_SLACK) {
            return (current, false);
        }
    }
    clamp_axis(raw, n)
}

/// Rounds to the nearest pixel and clamps into `[1, n]`, reporting whether
/// the clamp was needed.
fn clamp_axis(raw: f64, n: usize) -> (usize, bool) {
    let rounded = raw.round();
    if rounded.is_nan() || rounded < 1.0 {
        (1, true)
    } else if rounded > n as f64 {
        (n, true)
    } else {
        (rounded as usize, false)
    }
}

/// Finds the pixel of `tile` that contains `(ra, dec)`.
pub fn locate(tile: &Tile, ra: f64, dec: f64, max_iterations: usize) -> MaskResult<Location> {
    PixelLocator::new(tile, SkyCoord::new(ra, dec), max_iterations).run()
}
