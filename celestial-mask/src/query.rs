//! Contamination queries over loaded tiles.
//!
//! A query disc is clear when at least one tile covering its center has no
//! flagged pixel inside the disc. Pixels near the located one are placed by
//! linear extrapolation from that pixel's measured center and scale, in a
//! local frame around the query point where RA offsets are multiplied by
//! cos(dec).

use tracing::debug;

use crate::config::DiagnosticLevel;
use crate::error::{MaskError, MaskResult};
use crate::geometry::point_to_rect_min_dist_sq;
use crate::locator::{locate, Location, PixelIndex};
use crate::projection::wrap_ra_delta;
use crate::tile::Tile;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Outcome for one tile that covers the query center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileVerdict {
    /// Position of the tile in catalog order.
    pub tile_index: usize,
    /// Pixel containing the query center.
    pub pixel: PixelIndex,
    pub contaminated: bool,
}

/// Result of a contamination query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// True when any covering tile is clean within the radius.
    pub clear: bool,
    /// Covering tiles in catalog order, up to the first clean one unless
    /// every tile was scanned.
    pub verdicts: Vec<TileVerdict>,
}

/// Reports whether any flagged pixel of `tile` lies within `radius` degrees
/// of `(ra, dec)`. `location` is the located pixel for that position.
pub fn disc_contaminated(tile: &Tile, location: &Location, ra: f64, dec: f64, radius: f64) -> bool {
    let radius = radius.abs();
    let radius_sq = radius * radius;
    let cos_dec = libm::cos(dec * DEG_TO_RAD);

    let scale = &location.scale;
    let (px, py) = (location.pixel.x, location.pixel.y);
    let half_x = scale.d_ra.abs() * cos_dec / 2.0;
    let half_y = scale.d_dec.abs() / 2.0;

    let (x_lo, x_hi) = search_span(px, tile.nx(), radius, 2.0 * half_x);
    let (y_lo, y_hi) = search_span(py, tile.ny(), radius, 2.0 * half_y);
    let raster = tile.raster();

    for y in y_lo..=y_hi {
        let dec_offset = scale.center.dec() + (y as f64 - py as f64) * scale.d_dec - dec;
        for x in x_lo..=x_hi {
            let located = x == px && y == py;
            if !located {
                let ra_pix = scale.center.ra() + (x as f64 - px as f64) * scale.d_ra;
                let ra_offset = wrap_ra_delta(ra_pix - ra) * cos_dec;
                let dist_sq =
                    point_to_rect_min_dist_sq(0.0, 0.0, ra_offset, dec_offset, half_x, half_y);
                if dist_sq > radius_sq {
                    continue;
                }
            }
            if raster.is_contaminated(x, y) {
                return true;
            }
        }
    }
    false
}

/// Inclusive pixel range around `center` wide enough to hold the disc, plus
/// one pixel of margin, clamped to `[1, n]`.
fn search_span(center: usize, n: usize, radius: f64, pixel_size: f64) -> (usize, usize) {
    if !(pixel_size.is_finite() && pixel_size > 0.0) {
        return (1, n);
    }
    // Float to int casts saturate, so huge or NaN ratios stay in range.
    let reach = ((radius / pixel_size).ceil() as usize).saturating_add(1);
    (center.saturating_sub(reach).max(1), center.saturating_add(reach).min(n))
}

/// Runs a query over `tiles` in order.
///
/// Tiles that do not contain `(ra, dec)` are skipped. Any other locator
/// failure aborts the query, as does a radius that is not finite. With [`DiagnosticLevel::Detailed`] every
/// covering tile is scanned; otherwise the scan stops at the first clean one.
pub fn assess_tiles(
    tiles: &[Tile],
    ra: f64,
    dec: f64,
    radius: f64,
    max_iterations: usize,
    level: DiagnosticLevel,
) -> MaskResult<Assessment> {
    if !radius.is_finite() {
        return Err(MaskError::invalid_query(format!(
            "query radius must be finite, got {}",
            radius
        )));
    }

    let mut verdicts = Vec::new();
    let mut clear = false;

    for (tile_index, tile) in tiles.iter().enumerate() {
        let location = match locate(tile, ra, dec, max_iterations) {
            Ok(location) => location,
            Err(e) if e.is_outside() => continue,
            Err(e) => return Err(e),
        };

        let contaminated = disc_contaminated(tile, &location, ra, dec, radius);
        if level == DiagnosticLevel::Detailed {
            debug!(
                tile = %tile.path().display(),
                x = location.pixel.x,
                y = location.pixel.y,
                iterations = location.iterations,
                contaminated,
                "tile verdict"
            );
        }
        verdicts.push(TileVerdict {
            tile_index,
            pixel: location.pixel,
            contaminated,
        });

        if !contaminated {
            clear = true;
            if level != DiagnosticLevel::Detailed {
                break;
            }
        }
    }

    if verdicts.is_empty() {
        return Err(MaskError::NoCoverage { ra, dec });
    }

    if level != DiagnosticLevel::Quiet {
        debug!(ra, dec, radius, clear, tiles = verdicts.len(), "mask query");
    }
    Ok(Assessment { clear, verdicts })
}
