//! Pixel-to-sky projections for mask tiles.
//!
//! The query engine only ever needs the forward direction (pixel -> sky), so
//! [`Projection`] exposes exactly that, batched, with a per-point status.
//! [`TanProjection`] is the gnomonic FITS WCS used by the mask tiles, with an
//! optional forward SIP distortion. It is built from any [`KeywordProvider`].

use std::collections::HashMap;
use std::fmt;

use crate::error::{MaskError, MaskResult};

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;
const DETERMINANT_THRESHOLD: f64 = 1e-15;
const MAX_SIP_ORDER: u32 = 9;

/// 1-based FITS pixel coordinate. Pixel `(1, 1)` is centred on the first
/// element of the raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCoord {
    x: f64,
    y: f64,
}

impl PixelCoord {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn x(&self) -> f64 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.y
    }
}

/// Equatorial position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyCoord {
    ra: f64,
    dec: f64,
}

impl SkyCoord {
    #[inline]
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            ra: ra_deg,
            dec: dec_deg,
        }
    }

    #[inline]
    pub fn ra(&self) -> f64 {
        self.ra
    }

    #[inline]
    pub fn dec(&self) -> f64 {
        self.dec
    }
}

impl fmt::Display for SkyCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:+.6})", self.ra, self.dec)
    }
}

/// Normalizes a right ascension into `[0, 360)`.
pub fn normalize_ra(ra_deg: f64) -> f64 {
    let wrapped = ra_deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wraps a right-ascension difference into `[-180, 180)`.
pub fn wrap_ra_delta(delta_deg: f64) -> f64 {
    (delta_deg + 180.0).rem_euclid(360.0) - 180.0
}

/// Forward (pixel -> sky) evaluation of a tile's world coordinate system.
///
/// Implementations must accept fractional and out-of-range pixel coordinates.
pub trait Projection: fmt::Debug + Send + Sync {
    fn pixel_to_sky(&self, pixels: &[PixelCoord]) -> Vec<MaskResult<SkyCoord>>;

    /// Explicit deep copy, so a tile never shares projection state with a reader.
    fn boxed_clone(&self) -> Box<dyn Projection>;

    fn pixel_to_sky_one(&self, pixel: PixelCoord) -> MaskResult<SkyCoord> {
        self.pixel_to_sky(&[pixel])
            .pop()
            .unwrap_or_else(|| Err(MaskError::projection("projection returned no result")))
    }
}

impl Clone for Box<dyn Projection> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

pub trait KeywordProvider {
    fn get_string(&self, key: &str) -> Option<String>;
    fn get_float(&self, key: &str) -> Option<f64>;
    fn get_int(&self, key: &str) -> Option<i64>;

    fn require_float(&self, key: &str) -> MaskResult<f64> {
        self.get_float(key)
            .ok_or_else(|| MaskError::missing_keyword(key))
    }

    fn require_string(&self, key: &str) -> MaskResult<String> {
        self.get_string(key)
            .ok_or_else(|| MaskError::missing_keyword(key))
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeywordMap {
    strings: HashMap<String, String>,
    floats: HashMap<String, f64>,
    ints: HashMap<String, i64>,
}

impl KeywordMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.strings.insert(key.into(), value.into());
        self
    }

    pub fn set_float(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.floats.insert(key.into(), value);
        self
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.ints.insert(key.into(), value);
        self
    }

    /// Keywords for an axis-aligned TAN tile of `nx` x `ny` pixels centred on
    /// `(ra, dec)`, with RA increasing towards lower `x`.
    pub fn tan_tile(nx: usize, ny: usize, ra: f64, dec: f64, scale_deg: f64) -> Self {
        let mut map = Self::new();
        map.set_string("CTYPE1", "RA---TAN")
            .set_string("CTYPE2", "DEC--TAN")
            .set_float("CRPIX1", (nx as f64 + 1.0) / 2.0)
            .set_float("CRPIX2", (ny as f64 + 1.0) / 2.0)
            .set_float("CRVAL1", ra)
            .set_float("CRVAL2", dec)
            .set_float("CD1_1", -scale_deg)
            .set_float("CD1_2", 0.0)
            .set_float("CD2_1", 0.0)
            .set_float("CD2_2", scale_deg);
        map
    }

    /// Iterates the float keywords, then the integer and string ones.
    pub fn entries(&self) -> impl Iterator<Item = (&str, KeywordEntry<'_>)> {
        let floats = self
            .floats
            .iter()
            .map(|(k, v)| (k.as_str(), KeywordEntry::Float(*v)));
        let ints = self
            .ints
            .iter()
            .map(|(k, v)| (k.as_str(), KeywordEntry::Int(*v)));
        let strings = self
            .strings
            .iter()
            .map(|(k, v)| (k.as_str(), KeywordEntry::Str(v.as_str())));
        floats.chain(ints).chain(strings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeywordEntry<'a> {
    Float(f64),
    Int(i64),
    Str(&'a str),
}

impl KeywordProvider for KeywordMap {
    fn get_string(&self, key: &str) -> Option<String> {
        self.strings.get(key).cloned()
    }

    fn get_float(&self, key: &str) -> Option<f64> {
        self.floats
            .get(key)
            .copied()
            .or_else(|| self.ints.get(key).map(|&v| v as f64))
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.ints.get(key).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct SipPolynomial {
    terms: Vec<(i32, i32, f64)>,
}

impl SipPolynomial {
    fn from_keywords(keywords: &dyn KeywordProvider, prefix: &str) -> MaskResult<Self> {
        let order_key = format!("{}_ORDER", prefix);
        let order = match keywords.get_int(&order_key) {
            Some(order) => order,
            None => return Ok(Self::default()),
        };
        if !(0..=MAX_SIP_ORDER as i64).contains(&order) {
            return Err(MaskError::invalid_keyword(
                order_key,
                format!("SIP order must be between 0 and {}", MAX_SIP_ORDER),
            ));
        }

        let order = order as i32;
        let mut terms = Vec::new();
        for p in 0..=order {
            for q in 0..=(order - p) {
                let key = format!("{}_{}_{}", prefix, p, q);
                if let Some(coeff) = keywords.get_float(&key) {
                    if coeff != 0.0 {
                        terms.push((p, q, coeff));
                    }
                }
            }
        }
        Ok(Self { terms })
    }

    fn eval(&self, u: f64, v: f64) -> f64 {
        self.terms
            .iter()
            .map(|&(p, q, coeff)| coeff * u.powi(p) * v.powi(q))
            .sum()
    }

    fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Gnomonic projection with a CD (or PC x CDELT) matrix and optional forward
/// SIP distortion.
#[derive(Debug, Clone, PartialEq)]
pub struct TanProjection {
    crpix: [f64; 2],
    crval: [f64; 2],
    cd: [[f64; 2]; 2],
    sip_a: SipPolynomial,
    sip_b: SipPolynomial,
    alpha_p: f64,
    phi_p: f64,
    sin_delta_p: f64,
    cos_delta_p: f64,
}

impl TanProjection {
    pub fn new(crpix: [f64; 2], crval: [f64; 2], cd: [[f64; 2]; 2]) -> MaskResult<Self> {
        let determinant = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
        if !determinant.is_finite() || determinant.abs() < DETERMINANT_THRESHOLD {
            return Err(MaskError::projection(format!(
                "non-invertible CD matrix (determinant = {})",
                determinant
            )));
        }
        if !(-90.0..=90.0).contains(&crval[1]) {
            return Err(MaskError::invalid_keyword(
                "CRVAL2",
                "declination must lie within [-90, 90]",
            ));
        }

        // Zenithal: the native pole is the reference point, LONPOLE defaults
        // to 180 unless the reference point is the celestial north pole.
        let phi_p = if crval[1] >= 90.0 { 0.0 } else { 180.0 };
        let (sin_delta_p, cos_delta_p) = (crval[1] * DEG_TO_RAD).sin_cos();

        Ok(Self {
            crpix,
            crval,
            cd,
            sip_a: SipPolynomial::default(),
            sip_b: SipPolynomial::default(),
            alpha_p: crval[0] * DEG_TO_RAD,
            phi_p: phi_p * DEG_TO_RAD,
            sin_delta_p,
            cos_delta_p,
        })
    }

    pub fn from_keywords(keywords: &dyn KeywordProvider) -> MaskResult<Self> {
        let ctype1 = keywords.require_string("CTYPE1")?;
        let ctype2 = keywords.require_string("CTYPE2")?;
        check_ctype("CTYPE1", &ctype1, "RA--")?;
        check_ctype("CTYPE2", &ctype2, "DEC-")?;

        let crpix = [
            keywords.require_float("CRPIX1")?,
            keywords.require_float("CRPIX2")?,
        ];
        let crval = [
            keywords.require_float("CRVAL1")?,
            keywords.require_float("CRVAL2")?,
        ];
        let cd = read_linear_matrix(keywords)?;

        let mut projection = Self::new(crpix, crval, cd)?;

        if let Some(lonpole) = keywords.get_float("LONPOLE") {
            projection.phi_p = lonpole * DEG_TO_RAD;
        }

        if ctype1.ends_with("-SIP") || ctype2.ends_with("-SIP") {
            projection.sip_a = SipPolynomial::from_keywords(keywords, "A")?;
            projection.sip_b = SipPolynomial::from_keywords(keywords, "B")?;
        }

        Ok(projection)
    }

    #[inline]
    pub fn crpix(&self) -> [f64; 2] {
        self.crpix
    }

    #[inline]
    pub fn crval(&self) -> [f64; 2] {
        self.crval
    }

    #[inline]
    pub fn cd_matrix(&self) -> [[f64; 2]; 2] {
        self.cd
    }

    pub fn has_distortion(&self) -> bool {
        !self.sip_a.is_empty() || !self.sip_b.is_empty()
    }

    pub fn pixel_to_world(&self, pixel: PixelCoord) -> MaskResult<SkyCoord> {
        if !pixel.x().is_finite() || !pixel.y().is_finite() {
            return Err(MaskError::projection(format!(
                "non-finite pixel coordinate ({}, {})",
                pixel.x(),
                pixel.y()
            )));
        }

        let mut u = pixel.x() - self.crpix[0];
        let mut v = pixel.y() - self.crpix[1];
        if self.has_distortion() {
            let (f, g) = (self.sip_a.eval(u, v), self.sip_b.eval(u, v));
            u += f;
            v += g;
        }

        let x = (self.cd[0][0] * u + self.cd[0][1] * v) * DEG_TO_RAD;
        let y = (self.cd[1][0] * u + self.cd[1][1] * v) * DEG_TO_RAD;

        // Gnomonic deprojection to native spherical coordinates.
        let r_theta = libm::sqrt(x * x + y * y);
        let phi = if r_theta == 0.0 {
            0.0
        } else {
            libm::atan2(x, -y)
        };
        let theta = libm::atan2(1.0, r_theta);

        // Native -> celestial rotation.
        let (sin_theta, cos_theta) = theta.sin_cos();
        let (sin_d_phi, cos_d_phi) = (phi - self.phi_p).sin_cos();

        let sin_delta = sin_theta * self.sin_delta_p + cos_theta * self.cos_delta_p * cos_d_phi;
        let delta = libm::asin(sin_delta.clamp(-1.0, 1.0));

        let ax = -cos_theta * sin_d_phi;
        let ay = sin_theta * self.cos_delta_p - cos_theta * self.sin_delta_p * cos_d_phi;
        let alpha = self.alpha_p + libm::atan2(ax, ay);

        let sky = SkyCoord::new(normalize_ra(alpha * RAD_TO_DEG), delta * RAD_TO_DEG);
        if !sky.ra().is_finite() || !sky.dec().is_finite() {
            return Err(MaskError::projection(format!(
                "pixel ({}, {}) has no finite sky position",
                pixel.x(),
                pixel.y()
            )));
        }
        Ok(sky)
    }
}

impl Projection for TanProjection {
    fn pixel_to_sky(&self, pixels: &[PixelCoord]) -> Vec<MaskResult<SkyCoord>> {
        pixels.iter().map(|&p| self.pixel_to_world(p)).collect()
    }

    fn boxed_clone(&self) -> Box<dyn Projection> {
        Box::new(self.clone())
    }
}

fn check_ctype(keyword: &str, value: &str, axis: &str) -> MaskResult<()> {
    if !value.starts_with(axis) {
        return Err(MaskError::invalid_keyword(
            keyword,
            format!("expected a {} axis, found '{}'", axis.trim_end_matches('-'), value),
        ));
    }
    let code = value.get(5..8).unwrap_or("");
    if code != "TAN" {
        return Err(MaskError::invalid_keyword(
            keyword,
            format!("unsupported projection '{}', only TAN is handled", value),
        ));
    }
    Ok(())
}

fn read_linear_matrix(keywords: &dyn KeywordProvider) -> MaskResult<[[f64; 2]; 2]> {
    if keywords.get_float("CD1_1").is_some() || keywords.get_float("CD2_2").is_some() {
        let cd = |key: &str| keywords.get_float(key).unwrap_or(0.0);
        return Ok([[cd("CD1_1"), cd("CD1_2")], [cd("CD2_1"), cd("CD2_2")]]);
    }

    let cdelt = [
        keywords.require_float("CDELT1")?,
        keywords.require_float("CDELT2")?,
    ];
    let pc = |key: &str, default: f64| keywords.get_float(key).unwrap_or(default);
    let pc = [
        [pc("PC1_1", 1.0), pc("PC1_2", 0.0)],
        [pc("PC2_1", 0.0), pc("PC2_2", 1.0)],
    ];
    Ok([
        [cdelt[0] * pc[0][0], cdelt[0] * pc[0][1]],
        [cdelt[1] * pc[1][0], cdelt[1] * pc[1][1]],
    ])
}
