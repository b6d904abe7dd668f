//! Overlap predicates between tiles and query discs.
//!
//! These work in plain RA/Dec degrees, not on the sphere. The tile-vs-field
//! test is deliberately conservative: it may admit a tile that does not
//! really overlap, but never rejects one that does.

use crate::projection::wrap_ra_delta;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Below this cos(dec) the disc is treated as covering every right ascension.
const POLE_COS_LIMIT: f64 = 1e-9;

/// An axis-aligned box in RA/Dec, given by its center and full extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyRect {
    pub center_ra: f64,
    pub center_dec: f64,
    pub ra_extent: f64,
    pub dec_extent: f64,
}

/// A circular region of sky (center and angular radius, degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyDisc {
    pub center_ra: f64,
    pub center_dec: f64,
    pub radius: f64,
}

impl SkyRect {
    pub fn new(center_ra: f64, center_dec: f64, ra_extent: f64, dec_extent: f64) -> Self {
        Self {
            center_ra,
            center_dec,
            ra_extent: ra_extent.abs(),
            dec_extent: dec_extent.abs(),
        }
    }
}

impl SkyDisc {
    pub fn new(center_ra: f64, center_dec: f64, radius: f64) -> Self {
        Self {
            center_ra,
            center_dec,
            radius: radius.abs(),
        }
    }

    /// Half-width of the disc's bounding box along RA, in RA degrees.
    /// `None` when the disc wraps all the way around a pole.
    pub fn ra_half_width(&self) -> Option<f64> {
        let cos_dec = libm::cos(self.center_dec * DEG_TO_RAD);
        if cos_dec < POLE_COS_LIMIT {
            return None;
        }
        let half = self.radius / cos_dec;
        if half >= 180.0 {
            None
        } else {
            Some(half)
        }
    }
}

/// Returns true when the tile box intersects the disc's bounding box, with
/// the disc's RA half-width widened by `1 / cos(dec)`.
pub fn rect_overlaps_disc(rect: &SkyRect, disc: &SkyDisc) -> bool {
    let dec_gap = (rect.center_dec - disc.center_dec).abs();
    if dec_gap > rect.dec_extent / 2.0 + disc.radius {
        return false;
    }

    let disc_half_ra = match disc.ra_half_width() {
        Some(half) => half,
        None => return true,
    };

    let ra_gap = wrap_ra_delta(rect.center_ra - disc.center_ra).abs();
    ra_gap <= rect.ra_extent / 2.0 + disc_half_ra
}

/// Squared distance from a point to an axis-aligned rectangle given by its
/// center and half-widths. Zero when the point is inside.
#[inline]
pub fn point_to_rect_min_dist_sq(
    px: f64,
    py: f64,
    rect_center_x: f64,
    rect_center_y: f64,
    half_width_x: f64,
    half_width_y: f64,
) -> f64 {
    let dx = ((px - rect_center_x).abs() - half_width_x.abs()).max(0.0);
    let dy = ((py - rect_center_y).abs() - half_width_y.abs()).max(0.0);
    dx * dx + dy * dy
}
